//! Fehlertypen fuer den Signaling-Service

use callbridge_core::{CallbridgeError, EndpointId, SessionId};
use callbridge_protocol::ProtocolError;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Fehler der Session-Registry
///
/// Keiner dieser Fehler ist fatal: die betroffene Nachricht wird verworfen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Initiator besitzt bereits eine offene Session
    #[error("Doppelte Session: {0}")]
    DuplicateSession(SessionId),

    #[error("Session nicht gefunden: {0}")]
    SessionNotFound(SessionId),

    /// Responder wurde bereits gesetzt (Check-and-Set verloren)
    #[error("Session bereits beantwortet: {0}")]
    AlreadyAnswered(SessionId),

    /// Endpunkt ist bereits Teilnehmer einer anderen Session
    #[error("Endpunkt {endpoint} ist bereits in {session}")]
    EndpointBusy {
        endpoint: EndpointId,
        session: SessionId,
    },
}

impl From<RegistryError> for CallbridgeError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateSession(id) => Self::DuplicateSession(id.to_string()),
            RegistryError::SessionNotFound(id) => Self::SessionNotFound(id.to_string()),
            RegistryError::AlreadyAnswered(id) => Self::AlreadyAnswered(id.to_string()),
            andere @ RegistryError::EndpointBusy { .. } => Self::RoutingError(andere.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Grund warum der Router eine Nachricht verworfen hat
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Ziel ist nicht (mehr) verbunden
    #[error("Unbekanntes Ziel: {0}")]
    UnbekanntesZiel(EndpointId),

    /// Absender ist an keiner Session beteiligt
    #[error("Keine Session fuer {0}")]
    KeineSession(EndpointId),

    /// `from` im Offer passt nicht zur Verbindung
    #[error("Absender {behauptet} passt nicht zur Verbindung {tatsaechlich}")]
    FalscherAbsender {
        behauptet: EndpointId,
        tatsaechlich: EndpointId,
    },

    #[error("Offer an sich selbst")]
    AnSichSelbst,

    /// Answer ohne passende offene Offer des Ziels
    #[error("Kein passendes Angebot von {0}")]
    KeinPassendesAngebot(EndpointId),

    /// Send-Queue des Empfaengers voll oder geschlossen
    #[error("Zustellung an {0} fehlgeschlagen")]
    ZustellungFehlgeschlagen(EndpointId),

    /// Frame liess sich keinem Event zuordnen
    #[error("Ungueltiges Event: {0}")]
    UngueltigesEvent(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RoutingError {
    /// Label fuer `callbridge_routing_errors_total{reason}`
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnbekanntesZiel(_) => "unknown_target",
            Self::KeineSession(_) => "no_session",
            Self::FalscherAbsender { .. } => "sender_mismatch",
            Self::AnSichSelbst => "self_target",
            Self::KeinPassendesAngebot(_) => "no_matching_offer",
            Self::ZustellungFehlgeschlagen(_) => "delivery_failed",
            Self::UngueltigesEvent(_) => "invalid_event",
            Self::Registry(RegistryError::DuplicateSession(_)) => "duplicate_session",
            Self::Registry(RegistryError::SessionNotFound(_)) => "session_not_found",
            Self::Registry(RegistryError::AlreadyAnswered(_)) => "already_answered",
            Self::Registry(RegistryError::EndpointBusy { .. }) => "endpoint_busy",
        }
    }
}

impl From<RoutingError> for CallbridgeError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::Registry(r) => r.into(),
            andere => Self::RoutingError(andere.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-Fehler auf der Verbindung
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    #[error("Routing-Fehler: {0}")]
    Routing(#[from] RoutingError),
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
