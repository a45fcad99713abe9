//! Schnittstellen zu Media-Capture und Media-Peer
//!
//! Callbridge transportiert nur Signaling. Kamera, Mikrofon und die
//! eigentliche Peer-Verbindung stellt die Anwendung ueber diese Traits
//! bereit.

use async_trait::async_trait;
use callbridge_core::{EndpointId, Result};
use callbridge_protocol::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

/// STUN-Server der Standard-Peer-Konfiguration
pub const STANDARD_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

// ---------------------------------------------------------------------------
// Datentypen
// ---------------------------------------------------------------------------

/// Gewuenschte Capture-Geraete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Handle auf einen lokalen oder entfernten Medienstrom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// Konfiguration fuer ein neues Negotiation-Objekt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec![STANDARD_STUN_SERVER.to_string()],
            }],
        }
    }
}

// ---------------------------------------------------------------------------
// Peer-Events
// ---------------------------------------------------------------------------

/// Benachrichtigungen des Media-Peers (`onicecandidate`, `ontrack`)
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(MediaStream),
}

/// Sender fuer Peer-Events eines bestimmten Negotiation-Objekts
///
/// Jedes Objekt bekommt eine eigene Generation. Events eines bereits
/// geschlossenen Objekts erkennt die State-Machine daran und verwirft sie.
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSender {
    pub fn neu(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.senden(PeerEvent::LocalCandidate(candidate));
    }

    pub fn remote_track(&self, stream: MediaStream) {
        self.senden(PeerEvent::RemoteTrack(stream));
    }

    fn senden(&self, event: PeerEvent) {
        if self.tx.send((self.generation, event)).is_err() {
            tracing::trace!(generation = self.generation, "Peer-Event ohne Empfaenger");
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Zugriff auf Kamera und Mikrofon
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Liefert `MediaUnavailable` wenn kein Geraet verfuegbar ist oder der
    /// Zugriff verweigert wurde
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream>;

    async fn release(&self, stream: MediaStream);
}

/// Erzeugt Negotiation-Objekte
#[async_trait]
pub trait MediaPeerFactory: Send + Sync {
    async fn create_peer(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn MediaPeer>>;
}

/// Ein Negotiation-Objekt (eine Peer-Verbindung)
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn add_local_stream(&mut self, stream: &MediaStream) -> Result<()>;
    async fn create_offer(&mut self) -> Result<SessionDescription>;
    async fn create_answer(&mut self) -> Result<SessionDescription>;
    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;
    async fn close(&mut self);
}

/// Empfaenger fuer entfernte Medien
pub trait RemoteMediaSink: Send + Sync {
    fn remote_stream(&self, peer: &EndpointId, stream: MediaStream);
    fn remote_stream_ended(&self, peer: &EndpointId);
}
