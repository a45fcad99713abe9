//! Signaling-Router – Leitet Negotiation-Nachrichten zwischen Endpunkten weiter
//!
//! Der Router interpretiert keine Payloads. Er prueft nur ob eine Nachricht
//! zu einer Session passt, haelt die Registry aktuell und stellt ueber den
//! [`EventBroadcaster`] zu.
//!
//! ## Regeln
//! - **Offer**: `from` muss der Absender sein, das Ziel verbunden und nicht
//!   der Absender selbst. Eine bestehende Session des Absenders mit
//!   demselben Gegenueber wird wiederverwendet (auch fuer eine
//!   Renegotiation durch den Responder), jede andere wird ersetzt.
//! - **Answer**: braucht eine offene Offer des Ziels an den Absender oder
//!   eine beantwortete gemeinsame Session. Der Responder wird gesetzt bevor
//!   die Answer zugestellt wird.
//! - **IceCandidate**: geht an die Gegenstelle der Session des Absenders.
//! - **EndCall**: geht an die Gegenstelle, die Session wird entfernt.
//!
//! Die Reihenfolge pro Absender bleibt erhalten, weil jede Verbindung ihre
//! Nachrichten nacheinander routet und die Send-Queues FIFO sind.

use callbridge_core::{EndpointId, SessionId};
use callbridge_observability::CallbridgeMetrics;
use callbridge_protocol::events::{IncomingAnswer, IncomingOffer};
use callbridge_protocol::{IceCandidate, NegotiationMessage, RelayEvent, SessionDescription};

use crate::broadcast::EventBroadcaster;
use crate::error::RoutingError;
use crate::registry::{Session, SessionRegistry};

/// Router fuer Offer/Answer/IceCandidate/EndCall
#[derive(Clone)]
pub struct SignalingRouter {
    registry: SessionRegistry,
    broadcaster: EventBroadcaster,
    metriken: CallbridgeMetrics,
}

impl SignalingRouter {
    pub fn neu(
        registry: SessionRegistry,
        broadcaster: EventBroadcaster,
        metriken: CallbridgeMetrics,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            metriken,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Routet eine Negotiation-Nachricht von `sender`
    ///
    /// Ein Fehler bedeutet: Nachricht verworfen. Der Absender wird nicht
    /// benachrichtigt.
    pub fn route(
        &self,
        sender: &EndpointId,
        nachricht: NegotiationMessage,
    ) -> Result<(), RoutingError> {
        let kind = nachricht.kind();

        let ergebnis = match nachricht {
            NegotiationMessage::Offer {
                claimed_from,
                target,
                description,
            } => self.offer(sender, claimed_from, target, description),
            NegotiationMessage::Answer {
                target,
                description,
            } => self.answer(sender, target, description),
            NegotiationMessage::IceCandidate(candidate) => self.ice_candidate(sender, candidate),
            NegotiationMessage::EndCall => self.end_call(sender),
        };

        match &ergebnis {
            Ok(()) => {
                self.metriken
                    .signal_messages_total
                    .with_label_values(&[kind.as_str()])
                    .inc();
            }
            Err(e) => self.fehler_zaehlen(e),
        }
        self.sessions_gauge_aktualisieren();
        ergebnis
    }

    /// Zaehlt einen verworfenen Frame oder eine verworfene Nachricht
    pub fn fehler_zaehlen(&self, fehler: &RoutingError) {
        self.metriken
            .routing_errors_total
            .with_label_values(&[fehler.reason()])
            .inc();
    }

    /// Raeumt alle Sessions von `endpoint` ab und benachrichtigt die
    /// Gegenstellen mit `end-call`
    ///
    /// Gibt die Anzahl der beendeten Sessions zurueck.
    pub fn endpoint_disconnected(&self, endpoint: &EndpointId) -> usize {
        let entfernt = self.registry.on_endpoint_disconnect(endpoint);
        for session in &entfernt {
            tracing::info!(
                session = %session.id,
                endpoint = %endpoint,
                "Session durch Verbindungsabbruch beendet"
            );
            self.gegenstelle_beenden(session, endpoint);
        }
        self.sessions_gauge_aktualisieren();
        entfernt.len()
    }

    // -----------------------------------------------------------------------
    // Offer
    // -----------------------------------------------------------------------

    fn offer(
        &self,
        sender: &EndpointId,
        claimed_from: EndpointId,
        target: EndpointId,
        offer: SessionDescription,
    ) -> Result<(), RoutingError> {
        if claimed_from != *sender {
            return Err(RoutingError::FalscherAbsender {
                behauptet: claimed_from,
                tatsaechlich: sender.clone(),
            });
        }
        if target == *sender {
            return Err(RoutingError::AnSichSelbst);
        }
        if !self.broadcaster.ist_registriert(&target) {
            return Err(RoutingError::UnbekanntesZiel(target));
        }

        let neu_angelegt = match self.registry.lookup(sender) {
            // Erneute Offer innerhalb der Session (Renegotiation), von
            // Initiator oder Responder
            Some(s) if s.gegenueber(sender) == Some(&target) => {
                tracing::debug!(session = %s.id, "Offer in bestehender Session");
                false
            }
            Some(alt) => {
                self.ersetzen(&alt, sender);
                self.registry.create(sender, &target)?;
                true
            }
            None => {
                self.registry.create(sender, &target)?;
                true
            }
        };

        let event = RelayEvent::Offer(IncomingOffer {
            from_socket_id: sender.clone(),
            offer,
        });
        if !self.broadcaster.an_endpoint_senden(&target, event) {
            if neu_angelegt {
                self.registry.destroy(&SessionId::fuer_initiator(sender));
            }
            return Err(RoutingError::ZustellungFehlgeschlagen(target));
        }

        tracing::debug!(von = %sender, an = %target, "Offer weitergeleitet");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Answer
    // -----------------------------------------------------------------------

    fn answer(
        &self,
        sender: &EndpointId,
        target: EndpointId,
        answer: SessionDescription,
    ) -> Result<(), RoutingError> {
        let session = match self.registry.lookup(sender) {
            // Answer auf eine Renegotiation-Offer innerhalb der Session
            Some(s) if s.ist_beantwortet() && s.gegenueber(sender) == Some(&target) => s,
            _ => self.responder_anhaengen(sender, &target)?,
        };

        let event = RelayEvent::Answer(IncomingAnswer {
            from_socket_id: sender.clone(),
            answer,
        });
        if !self.broadcaster.an_endpoint_senden(&target, event) {
            // Initiator nicht erreichbar: Session aufgeben
            if let Some(s) = self.registry.destroy(&session.id) {
                self.gegenstelle_beenden(&s, &target);
            }
            return Err(RoutingError::ZustellungFehlgeschlagen(target));
        }

        tracing::debug!(von = %sender, an = %target, session = %session.id, "Answer weitergeleitet");
        Ok(())
    }

    /// Sucht das Offer von `initiator` an `sender` und haengt `sender` als
    /// Responder an
    fn responder_anhaengen(
        &self,
        sender: &EndpointId,
        initiator: &EndpointId,
    ) -> Result<Session, RoutingError> {
        let session = self
            .registry
            .lookup(initiator)
            .filter(|s| s.initiator == *initiator && s.target == *sender)
            .ok_or_else(|| RoutingError::KeinPassendesAngebot(initiator.clone()))?;

        if session.responder.as_ref() != Some(sender) {
            // Andere Session des Absenders weicht der neuen Answer
            if let Some(alt) = self.registry.lookup(sender) {
                if alt.id != session.id {
                    self.ersetzen(&alt, sender);
                }
            }
            self.registry.attach_responder(&session.id, sender)?;
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // IceCandidate
    // -----------------------------------------------------------------------

    fn ice_candidate(
        &self,
        sender: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), RoutingError> {
        let session = self
            .registry
            .lookup(sender)
            .ok_or_else(|| RoutingError::KeineSession(sender.clone()))?;
        let ziel = session
            .gegenueber(sender)
            .cloned()
            .ok_or_else(|| RoutingError::KeineSession(sender.clone()))?;

        if !self
            .broadcaster
            .an_endpoint_senden(&ziel, RelayEvent::IceCandidate(candidate))
        {
            return Err(RoutingError::ZustellungFehlgeschlagen(ziel));
        }
        tracing::trace!(von = %sender, an = %ziel, "IceCandidate weitergeleitet");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // EndCall
    // -----------------------------------------------------------------------

    fn end_call(&self, sender: &EndpointId) -> Result<(), RoutingError> {
        // Beteiligt, oder eingeladen und lehnt ab
        let sessions: Vec<Session> = match self.registry.lookup(sender) {
            Some(s) => vec![s],
            None => self.registry.offene_angebote_an(sender),
        };
        if sessions.is_empty() {
            return Err(RoutingError::KeineSession(sender.clone()));
        }

        for session in sessions {
            if let Some(entfernt) = self.registry.destroy(&session.id) {
                tracing::info!(session = %entfernt.id, von = %sender, "Call beendet");
                self.gegenstelle_beenden(&entfernt, sender);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Entfernt eine Session die durch eine neue Negotiation abgeloest wird
    fn ersetzen(&self, alt: &Session, sender: &EndpointId) {
        if let Some(entfernt) = self.registry.destroy(&alt.id) {
            tracing::info!(session = %entfernt.id, endpoint = %sender, "Session ersetzt");
            self.gegenstelle_beenden(&entfernt, sender);
        }
    }

    /// Schickt `end-call` an die Gegenstelle von `ausloeser`
    fn gegenstelle_beenden(&self, session: &Session, ausloeser: &EndpointId) {
        if let Some(peer) = session.gegenueber(ausloeser) {
            if !self.broadcaster.an_endpoint_senden(peer, RelayEvent::EndCall) {
                tracing::debug!(endpoint = %peer, "end-call nicht zustellbar");
            }
        }
    }

    fn sessions_gauge_aktualisieren(&self) {
        self.metriken.sessions_active.set(self.registry.len() as i64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
