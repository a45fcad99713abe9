//! Fehlertypen fuer das Protokoll-Crate

use thiserror::Error;

/// Fehler beim Lesen oder Schreiben von Frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame ueberschreitet das konfigurierte Limit (fatal fuer die Verbindung)
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    FrameZuGross { laenge: usize, maximum: usize },

    /// Payload ist kein bekanntes Event (nur dieser Frame wird verworfen)
    #[error("Ungueltiges Event: {0}")]
    UngueltigesEvent(String),

    #[error("JSON-Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Gibt true zurueck wenn die Verbindung danach nicht weiter lesbar ist
    pub fn ist_fatal(&self) -> bool {
        matches!(self, Self::FrameZuGross { .. } | Self::Io(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
