//! Event-Vokabular zwischen Endpunkt und Relay
//!
//! Jede Nachricht ist ein benanntes Event mit optionalem Payload. Auf dem
//! Draht sieht das so aus:
//!
//! ```text
//! {"event": "offer", "data": {"from": "A", "to": "B", "offer": {...}}}
//! {"event": "end-call"}
//! ```
//!
//! `ClientEvent` fliesst vom Endpunkt zum Relay, `RelayEvent` vom Relay zum
//! Endpunkt. Offer und Answer haben je Richtung eine andere Form, deshalb
//! gibt es zwei getrennte Enums.

use callbridge_core::types::{EndpointId, GroupId};
use serde::{Deserialize, Serialize};

use crate::negotiation::{ChatMessage, IceCandidate, SessionDescription};

// ---------------------------------------------------------------------------
// Event-Namen
// ---------------------------------------------------------------------------

/// Name eines Events, unter dem ein Handler registriert werden kann
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Connected,
    Offer,
    Answer,
    IceCandidate,
    EndCall,
    SendMessageGroup,
    ReceiveMessage,
    JoinGroup,
    LeaveGroup,
    Ping,
    Pong,
}

impl EventName {
    /// Name wie er auf dem Draht steht
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "icecandidate",
            Self::EndCall => "end-call",
            Self::SendMessageGroup => "send-message-group",
            Self::ReceiveMessage => "receive-message",
            Self::JoinGroup => "join-group",
            Self::LeaveGroup => "leave-group",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads Endpunkt -> Relay
// ---------------------------------------------------------------------------

/// Ausgehende Offer eines Anrufers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Absender (muss der eigenen Verbindungs-ID entsprechen)
    pub from: EndpointId,
    /// Angerufener Endpunkt
    pub to: EndpointId,
    pub offer: SessionDescription,
}

/// Answer des Angerufenen an den Initiator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub to_socket_id: EndpointId,
    pub answer: SessionDescription,
}

/// Gruppen beitreten oder verlassen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    pub group_id: GroupId,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Payloads Relay -> Endpunkt
// ---------------------------------------------------------------------------

/// Erste Nachricht nach dem Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// Vom Relay vergebene Verbindungs-ID
    pub socket_id: EndpointId,
}

/// Zugestellte Offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingOffer {
    pub from_socket_id: EndpointId,
    pub offer: SessionDescription,
}

/// Zugestellte Answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAnswer {
    pub from_socket_id: EndpointId,
    pub answer: SessionDescription,
}

/// Ping vom Relay (Keepalive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Event-Enums
// ---------------------------------------------------------------------------

/// Events vom Endpunkt an das Relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "offer")]
    Offer(OfferRequest),
    #[serde(rename = "answer")]
    Answer(AnswerRequest),
    #[serde(rename = "icecandidate")]
    IceCandidate(IceCandidate),
    #[serde(rename = "end-call")]
    EndCall,
    #[serde(rename = "send-message-group")]
    SendMessageGroup(ChatMessage),
    #[serde(rename = "join-group")]
    JoinGroup(GroupMembership),
    #[serde(rename = "leave-group")]
    LeaveGroup(GroupMembership),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

impl ClientEvent {
    pub fn name(&self) -> EventName {
        match self {
            Self::Offer(_) => EventName::Offer,
            Self::Answer(_) => EventName::Answer,
            Self::IceCandidate(_) => EventName::IceCandidate,
            Self::EndCall => EventName::EndCall,
            Self::SendMessageGroup(_) => EventName::SendMessageGroup,
            Self::JoinGroup(_) => EventName::JoinGroup,
            Self::LeaveGroup(_) => EventName::LeaveGroup,
            Self::Pong(_) => EventName::Pong,
        }
    }
}

/// Events vom Relay an einen Endpunkt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RelayEvent {
    #[serde(rename = "connected")]
    Connected(ConnectedInfo),
    #[serde(rename = "offer")]
    Offer(IncomingOffer),
    #[serde(rename = "answer")]
    Answer(IncomingAnswer),
    #[serde(rename = "icecandidate")]
    IceCandidate(IceCandidate),
    #[serde(rename = "end-call")]
    EndCall,
    #[serde(rename = "receive-message")]
    ReceiveMessage(ChatMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
}

impl RelayEvent {
    pub fn name(&self) -> EventName {
        match self {
            Self::Connected(_) => EventName::Connected,
            Self::Offer(_) => EventName::Offer,
            Self::Answer(_) => EventName::Answer,
            Self::IceCandidate(_) => EventName::IceCandidate,
            Self::EndCall => EventName::EndCall,
            Self::ReceiveMessage(_) => EventName::ReceiveMessage,
            Self::Ping(_) => EventName::Ping,
        }
    }

    /// Erstellt ein Ping-Event mit aktuellem Timestamp
    pub fn ping_jetzt() -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::Ping(PingMessage { timestamp_ms })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::SdpType;
    use serde_json::json;

    #[test]
    fn offer_hat_originale_feldnamen() {
        let event = ClientEvent::Offer(OfferRequest {
            from: "A".into(),
            to: "B".into(),
            offer: SessionDescription::new(SdpType::Offer, "v=0"),
        });
        let wert = serde_json::to_value(&event).unwrap();
        assert_eq!(
            wert,
            json!({
                "event": "offer",
                "data": {"from": "A", "to": "B", "offer": {"type": "offer", "sdp": "v=0"}}
            })
        );
    }

    #[test]
    fn answer_wird_mit_from_socket_id_zugestellt() {
        let event = RelayEvent::Answer(IncomingAnswer {
            from_socket_id: "B".into(),
            answer: SessionDescription::new(SdpType::Answer, "v=0"),
        });
        let wert = serde_json::to_value(&event).unwrap();
        assert_eq!(wert["event"], "answer");
        assert_eq!(wert["data"]["fromSocketId"], "B");
    }

    #[test]
    fn end_call_ohne_payload() {
        let json = serde_json::to_string(&ClientEvent::EndCall).unwrap();
        assert_eq!(json, r#"{"event":"end-call"}"#);
        let zurueck: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, ClientEvent::EndCall);
    }

    #[test]
    fn gruppen_nachricht_aus_json() {
        let json = r#"{"event":"send-message-group","data":{"groupId":"g1","messageContent":"hi","senderSocketId":"A"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessageGroup(m) => {
                assert_eq!(m.group_id.as_str(), "g1");
                assert_eq!(m.message_content, "hi");
                assert_eq!(m.sender_socket_id.as_str(), "A");
            }
            andere => panic!("Erwartet SendMessageGroup, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn unbekanntes_event_wird_abgelehnt() {
        let json = r#"{"event":"hangup","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn event_namen_passen_zum_draht() {
        let event = RelayEvent::EndCall;
        let wert = serde_json::to_value(&event).unwrap();
        assert_eq!(wert["event"], event.name().as_str());
        assert_eq!(EventName::IceCandidate.as_str(), "icecandidate");
    }
}
