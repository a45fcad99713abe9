//! callbridge-call – Endpunkt-Seite von Callbridge
//!
//! Verbindet sich mit dem Relay, fuehrt pro Endpunkt genau eine
//! Call-State-Machine und reicht Gruppen-Nachrichten durch.
//!
//! ## Architektur
//!
//! ```text
//! CallHandle (Anwendung)
//!     |  Befehle
//!     v
//! CallEndpoint-Task
//!     +-- CallMachine      (Idle, AwaitingAnswer, AwaitingOffer, Active)
//!     |       +-- MediaCapture / MediaPeerFactory / RemoteMediaSink
//!     +-- RelayConnection  (Events per Subscription, Senden ueber Queue)
//! ```
//!
//! Medien selbst sind nicht Teil dieses Crates. Die Anwendung liefert
//! Implementierungen der Traits aus [`media`].

pub mod endpoint;
pub mod error;
pub mod machine;
pub mod media;
pub mod transport;

#[cfg(test)]
mod tests;

// Bequeme Re-Exporte
pub use endpoint::{CallEndpoint, CallHandle, CallStatus};
pub use error::{TransportError, TransportResult};
pub use machine::{CallConfig, CallMachine, CallState, EarlyCandidates};
pub use media::{
    IceServer, MediaCapture, MediaConstraints, MediaPeer, MediaPeerFactory, MediaStream,
    MediaTrack, PeerConfig, PeerEvent, PeerEventSender, RemoteMediaSink, TrackKind,
};
pub use transport::{RelayConnection, SignalTransport, Subscription};
