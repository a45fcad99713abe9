//! Fehlertypen fuer Callbridge
//!
//! Zentraler Fehler-Enum fuer die crate-uebergreifende Taxonomie.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`
//! oder `From`-Implementierungen hierher.

use thiserror::Error;

/// Globaler Result-Alias fuer Callbridge
pub type Result<T> = std::result::Result<T, CallbridgeError>;

/// Fehler-Taxonomie des Callbridge-Systems
#[derive(Debug, Error)]
pub enum CallbridgeError {
    // --- Media ---
    /// Capture verweigert oder kein Geraet vorhanden
    #[error("Medien nicht verfuegbar: {0}")]
    MediaUnavailable(String),

    // --- Negotiation ---
    /// Ungueltige oder ausser der Reihe eingetroffene Offer/Answer
    #[error("Negotiation fehlgeschlagen: {0}")]
    NegotiationFailed(String),

    // --- Session-Registry ---
    #[error("Session nicht gefunden: {0}")]
    SessionNotFound(String),

    #[error("Endpunkt besitzt bereits eine offene Session: {0}")]
    DuplicateSession(String),

    #[error("Session wurde bereits beantwortet: {0}")]
    AlreadyAnswered(String),

    // --- Routing ---
    #[error("Routing-Fehler: {0}")]
    RoutingError(String),

    // --- Transport ---
    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CallbridgeError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler nur die betroffene Session beendet
    ///
    /// Registry- und Routing-Fehler duerfen den Prozess nie beenden.
    pub fn betrifft_nur_session(&self) -> bool {
        matches!(
            self,
            Self::NegotiationFailed(_)
                | Self::SessionNotFound(_)
                | Self::DuplicateSession(_)
                | Self::AlreadyAnswered(_)
                | Self::RoutingError(_)
        )
    }

    /// Gibt true zurueck wenn der Call-Versuch endgueltig gescheitert ist
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::MediaUnavailable(_))
    }
}
