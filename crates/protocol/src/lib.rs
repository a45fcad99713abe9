//! callbridge-protocol – Event-Vokabular und Wire-Format
//!
//! Dieses Crate definiert alle Events die zwischen Endpunkt und Relay
//! ausgetauscht werden, die Negotiation-Payloads und den Frame-Codec.

pub mod error;
pub mod events;
pub mod negotiation;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use events::{ClientEvent, EventName, RelayEvent};
pub use negotiation::{
    ChatMessage, IceCandidate, NegotiationKind, NegotiationMessage, SdpType, SessionDescription,
};
pub use wire::{EndpointCodec, FrameCodec, RelayCodec};
