//! Negotiation-Payloads und Routing-Nachrichten
//!
//! Session-Descriptions und ICE-Candidates werden vom Relay nicht
//! interpretiert. Die Typen bilden nur die Form ab, die die
//! Media-Peer-Schicht erwartet (`RTCSessionDescriptionInit`,
//! `RTCIceCandidateInit`).

use callbridge_core::types::{EndpointId, GroupId};
use serde::{Deserialize, Serialize};

/// Art einer Session-Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session-Description (Offer oder Answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// Beschreibung eines moeglichen Netzwerkpfads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate ohne Media-Zuordnung
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Chat-Nachricht an eine Gruppe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub group_id: GroupId,
    pub message_content: String,
    pub sender_socket_id: EndpointId,
}

// ---------------------------------------------------------------------------
// Routing-Sicht
// ---------------------------------------------------------------------------

/// Art einer Negotiation-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationKind {
    Offer,
    Answer,
    IceCandidate,
    EndCall,
}

impl NegotiationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "icecandidate",
            Self::EndCall => "end-call",
        }
    }
}

/// Negotiation-Nachricht wie sie der Router sieht
///
/// Der Absender kommt immer aus der Verbindung, nie aus dem Payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    Offer {
        /// Vom Endpunkt behaupteter Absender (`from`)
        claimed_from: EndpointId,
        target: EndpointId,
        description: SessionDescription,
    },
    Answer {
        target: EndpointId,
        description: SessionDescription,
    },
    IceCandidate(IceCandidate),
    EndCall,
}

impl NegotiationMessage {
    pub fn kind(&self) -> NegotiationKind {
        match self {
            Self::Offer { .. } => NegotiationKind::Offer,
            Self::Answer { .. } => NegotiationKind::Answer,
            Self::IceCandidate(_) => NegotiationKind::IceCandidate,
            Self::EndCall => NegotiationKind::EndCall,
        }
    }

    /// Explizites Ziel, falls die Nachricht eins traegt
    pub fn target(&self) -> Option<&EndpointId> {
        match self {
            Self::Offer { target, .. } | Self::Answer { target, .. } => Some(target),
            Self::IceCandidate(_) | Self::EndCall => None,
        }
    }
}
