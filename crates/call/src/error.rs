//! Fehlertypen der Relay-Verbindung

use callbridge_core::CallbridgeError;
use callbridge_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Verbindungsaufbau fehlgeschlagen: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protokoll(#[from] ProtocolError),

    /// Das Relay hat nicht mit `connected` begonnen
    #[error("Relay hat keine Verbindungs-ID gesendet")]
    KeinConnected,

    #[error("Verbindung zum Relay geschlossen")]
    Geschlossen,
}

pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for CallbridgeError {
    fn from(e: TransportError) -> Self {
        CallbridgeError::Getrennt(e.to_string())
    }
}
