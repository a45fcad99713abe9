//! Session-Registry – Wer telefoniert mit wem
//!
//! Die Registry ist der einzige Ort an dem Session-Mitgliedschaften
//! veraendert werden. Sie haelt zwei Maps:
//!
//! - `sessions`: SessionId -> Session
//! - `participants`: EndpointId -> SessionId (Initiator und Responder)
//!
//! ## Lock-Reihenfolge
//! Immer zuerst `sessions`, dann `participants`. Ein Guard auf
//! `participants` wird nie gehalten waehrend ein `sessions`-Lock angefordert
//! wird. Gesperrt wird pro Eintrag (DashMap-Shard), nie global.

use callbridge_core::{EndpointId, SessionId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::RegistryError;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Stand der Negotiation innerhalb einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Offer zugestellt, noch keine Answer
    Offered,
    /// Responder hat geantwortet
    Answered,
}

/// Eine Call-Negotiation zwischen genau zwei Endpunkten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub initiator: EndpointId,
    /// Eingeladener Endpunkt (Ziel der Offer)
    pub target: EndpointId,
    /// Gesetzt sobald das Ziel geantwortet hat
    pub responder: Option<EndpointId>,
    pub state: NegotiationState,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn neu(initiator: EndpointId, target: EndpointId) -> Self {
        Self {
            id: SessionId::fuer_initiator(&initiator),
            initiator,
            target,
            responder: None,
            state: NegotiationState::Offered,
            created_at: Utc::now(),
        }
    }

    /// Gegenstelle von `endpoint` in dieser Session
    ///
    /// Fuer den Initiator ist das vor der Answer das eingeladene Ziel.
    pub fn gegenueber(&self, endpoint: &EndpointId) -> Option<&EndpointId> {
        if *endpoint == self.initiator {
            Some(self.responder.as_ref().unwrap_or(&self.target))
        } else if *endpoint == self.target || self.responder.as_ref() == Some(endpoint) {
            Some(&self.initiator)
        } else {
            None
        }
    }

    pub fn ist_beantwortet(&self) -> bool {
        self.state == NegotiationState::Answered
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Thread-safe Registry aller offenen Sessions
///
/// Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: DashMap<SessionId, Session>,
    participants: DashMap<EndpointId, SessionId>,
}

impl SessionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine Session mit `initiator` an
    ///
    /// Schlaegt mit `DuplicateSession` fehl wenn der Initiator bereits eine
    /// offene Session besitzt, mit `EndpointBusy` wenn er Responder einer
    /// fremden Session ist.
    pub fn create(
        &self,
        initiator: &EndpointId,
        target: &EndpointId,
    ) -> Result<SessionId, RegistryError> {
        let id = SessionId::fuer_initiator(initiator);

        match self.inner.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateSession(id)),
            Entry::Vacant(frei) => {
                match self.inner.participants.entry(initiator.clone()) {
                    Entry::Occupied(belegt) => {
                        return Err(RegistryError::EndpointBusy {
                            endpoint: initiator.clone(),
                            session: belegt.get().clone(),
                        });
                    }
                    Entry::Vacant(teilnehmer) => {
                        teilnehmer.insert(id.clone());
                    }
                }
                frei.insert(Session::neu(initiator.clone(), target.clone()));
                tracing::debug!(session = %id, ziel = %target, "Session angelegt");
                Ok(id)
            }
        }
    }

    /// Setzt den Responder einer Session (atomares Check-and-Set)
    ///
    /// Der Eintrag der Session bleibt waehrend der gesamten Pruefung
    /// gesperrt, so dass von zwei gleichzeitigen Aufrufen genau einer gewinnt.
    pub fn attach_responder(
        &self,
        session_id: &SessionId,
        responder: &EndpointId,
    ) -> Result<(), RegistryError> {
        let mut session = self
            .inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.clone()))?;

        if session.responder.is_some() {
            return Err(RegistryError::AlreadyAnswered(session_id.clone()));
        }

        match self.inner.participants.entry(responder.clone()) {
            Entry::Occupied(belegt) => {
                return Err(RegistryError::EndpointBusy {
                    endpoint: responder.clone(),
                    session: belegt.get().clone(),
                });
            }
            Entry::Vacant(frei) => {
                frei.insert(session_id.clone());
            }
        }

        session.responder = Some(responder.clone());
        session.state = NegotiationState::Answered;
        tracing::debug!(session = %session_id, responder = %responder, "Responder gesetzt");
        Ok(())
    }

    /// Session an der `endpoint` als Initiator oder Responder beteiligt ist
    pub fn lookup(&self, endpoint: &EndpointId) -> Option<Session> {
        // Guard vor dem Zugriff auf `sessions` freigeben
        let id = self.inner.participants.get(endpoint)?.value().clone();
        self.inner
            .sessions
            .get(&id)
            .map(|s| s.value().clone())
            .filter(|s| s.initiator == *endpoint || s.responder.as_ref() == Some(endpoint))
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.inner.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Unbeantwortete Sessions die `endpoint` eingeladen haben
    pub fn offene_angebote_an(&self, endpoint: &EndpointId) -> Vec<Session> {
        self.inner
            .sessions
            .iter()
            .filter(|s| s.responder.is_none() && s.target == *endpoint)
            .map(|s| s.value().clone())
            .collect()
    }

    /// Entfernt eine Session samt Teilnehmer-Eintraegen
    ///
    /// Idempotent: ein zweiter Aufruf ist ein No-op und liefert `None`.
    pub fn destroy(&self, session_id: &SessionId) -> Option<Session> {
        let (_, session) = self.inner.sessions.remove(session_id)?;

        self.inner
            .participants
            .remove_if(&session.initiator, |_, id| id == session_id);
        if let Some(responder) = &session.responder {
            self.inner
                .participants
                .remove_if(responder, |_, id| id == session_id);
        }

        tracing::debug!(session = %session_id, "Session entfernt");
        Some(session)
    }

    /// Entfernt alle Sessions an denen `endpoint` beteiligt oder zu denen er
    /// eingeladen ist
    ///
    /// Gibt die entfernten Sessions zurueck; der Aufrufer muss die
    /// Gegenstellen mit `end-call` benachrichtigen.
    pub fn on_endpoint_disconnect(&self, endpoint: &EndpointId) -> Vec<Session> {
        let mut ids: Vec<SessionId> = self
            .offene_angebote_an(endpoint)
            .into_iter()
            .map(|s| s.id)
            .collect();
        if let Some(eigene) = self.lookup(endpoint) {
            ids.push(eigene.id);
        }

        ids.iter().filter_map(|id| self.destroy(id)).collect()
    }

    /// Momentaufnahme aller Sessions
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
