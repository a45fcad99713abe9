//! Gemeinsame Identifikationstypen fuer Callbridge
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Die Inhalte sind
//! opake Strings, weil Endpunkt-IDs vom Transport vergeben werden.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verbindungs-ID eines Endpunkts
///
/// Vom Relay pro Verbindung vergeben, eindeutig solange die Verbindung
/// besteht. Nach einem Reconnect bekommt der Endpunkt eine neue ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Erstellt eine neue zufaellige EndpointId (UUID v4)
    pub fn neu() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// ID einer Call-Session
///
/// Wird aus der Verbindungs-ID des Initiators abgeleitet. Ein Initiator
/// besitzt hoechstens eine offene Session, daher ist die Ableitung eindeutig.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Leitet die Session-ID aus dem Initiator ab
    pub fn fuer_initiator(initiator: &EndpointId) -> Self {
        Self(initiator.0.clone())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// ID einer Chat-Gruppe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
