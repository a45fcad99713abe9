//! Message-Dispatcher – Ordnet eingehende Events Router und Gruppen zu
//!
//! Der Dispatcher antwortet nie direkt. Alles was ein Endpunkt sieht kommt
//! ueber die Send-Queues des Broadcasters.

use callbridge_core::EndpointId;
use callbridge_protocol::{ClientEvent, NegotiationMessage, ProtocolError};
use std::sync::Arc;

use crate::error::RoutingError;
use crate::server_state::SignalingState;

/// Zentraler Message-Dispatcher einer Verbindung
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet ein Event von `sender`
    ///
    /// Routing-Fehler werden geloggt und verschluckt.
    pub fn dispatch(&self, sender: &EndpointId, event: ClientEvent) {
        let nachricht = match event {
            ClientEvent::Offer(req) => NegotiationMessage::Offer {
                claimed_from: req.from,
                target: req.to,
                description: req.offer,
            },
            ClientEvent::Answer(req) => NegotiationMessage::Answer {
                target: req.to_socket_id,
                description: req.answer,
            },
            ClientEvent::IceCandidate(candidate) => NegotiationMessage::IceCandidate(candidate),
            ClientEvent::EndCall => NegotiationMessage::EndCall,

            // -------------------------------------------------------------------
            // Gruppen
            // -------------------------------------------------------------------
            ClientEvent::SendMessageGroup(mut nachricht) => {
                if nachricht.sender_socket_id != *sender {
                    tracing::debug!(
                        endpoint = %sender,
                        behauptet = %nachricht.sender_socket_id,
                        "Absender der Gruppen-Nachricht korrigiert"
                    );
                    nachricht.sender_socket_id = sender.clone();
                }
                let zugestellt = self.state.groups.send_to_group(nachricht);
                self.state
                    .metriken
                    .group_messages_total
                    .inc_by(zugestellt as u64);
                return;
            }
            ClientEvent::JoinGroup(g) => {
                self.state.groups.join(g.group_id, sender.clone());
                return;
            }
            ClientEvent::LeaveGroup(g) => {
                self.state.groups.leave(&g.group_id, sender);
                return;
            }

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            ClientEvent::Pong(pong) => {
                let jetzt_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                tracing::trace!(
                    endpoint = %sender,
                    rtt_ms = jetzt_ms.saturating_sub(pong.echo_timestamp_ms),
                    "Pong empfangen"
                );
                return;
            }
        };

        let kind = nachricht.kind();
        if let Err(fehler) = self.state.router.route(sender, nachricht) {
            tracing::warn!(
                endpoint = %sender,
                kind = kind.as_str(),
                grund = fehler.reason(),
                fehler = %fehler,
                "Nachricht verworfen"
            );
        }
    }

    /// Meldet einen Frame der sich keinem Event zuordnen liess
    pub fn ungueltiger_frame(&self, sender: &EndpointId, fehler: &ProtocolError) {
        let fehler = RoutingError::UngueltigesEvent(fehler.to_string());
        tracing::warn!(endpoint = %sender, fehler = %fehler, "Frame verworfen");
        self.state.router.fehler_zaehlen(&fehler);
    }
}
