//! callbridge-signaling – Relay fuer Call-Signaling und Gruppen-Chat
//!
//! Dieser Crate implementiert die Relay-Seite von Callbridge. Er nimmt
//! TCP-Verbindungen an, vergibt Verbindungs-IDs und leitet Offer, Answer,
//! ICE-Candidates und End-Call zwischen genau zwei Endpunkten weiter.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- SignalingRouter  (Offer, Answer, IceCandidate, EndCall)
//!     |       +-- SessionRegistry (Sessions, Teilnehmer)
//!     +-- GroupRelay       (Join, Leave, Gruppen-Nachrichten)
//!
//! EventBroadcaster – Send-Queues aller verbundenen Endpunkte
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod groups;
pub mod registry;
pub mod router;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{RegistryError, RoutingError, SignalingError, SignalingResult};
pub use groups::GroupRelay;
pub use registry::{NegotiationState, Session, SessionRegistry};
pub use router::SignalingRouter;
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
