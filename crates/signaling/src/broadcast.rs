//! Event-Broadcaster – Send-Queues aller verbundenen Endpunkte
//!
//! Jeder Endpunkt bekommt beim Verbindungsaufbau eine begrenzte Queue. Die
//! `ClientConnection` liest daraus und schreibt auf den TCP-Stream. Router
//! und Gruppen-Relay reihen nur ein und blockieren nie.

use callbridge_core::EndpointId;
use callbridge_protocol::RelayEvent;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard-Groesse der Send-Queue pro Endpunkt
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// EndpointSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines verbundenen Endpunkts
#[derive(Clone, Debug)]
pub struct EndpointSender {
    pub endpoint: EndpointId,
    pub tx: mpsc::Sender<RelayEvent>,
}

impl EndpointSender {
    /// Reiht ein Event nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, event: RelayEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    event = %event.name(),
                    "Send-Queue voll – Event verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(endpoint = %self.endpoint, "Send-Queue geschlossen (Endpunkt getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Zentrale Zustellung an verbundene Endpunkte
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    endpoints: DashMap<EndpointId, EndpointSender>,
    queue_groesse: usize,
}

impl EventBroadcaster {
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                endpoints: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert einen Endpunkt und gibt seine Empfangs-Queue zurueck
    pub fn endpoint_registrieren(&self, endpoint: EndpointId) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let sender = EndpointSender {
            endpoint: endpoint.clone(),
            tx,
        };
        self.inner.endpoints.insert(endpoint.clone(), sender);
        tracing::debug!(endpoint = %endpoint, "Endpunkt im Broadcaster registriert");
        rx
    }

    pub fn endpoint_entfernen(&self, endpoint: &EndpointId) {
        if self.inner.endpoints.remove(endpoint).is_some() {
            tracing::debug!(endpoint = %endpoint, "Endpunkt aus Broadcaster entfernt");
        }
    }

    /// Sendet ein Event an einen einzelnen Endpunkt
    ///
    /// Gibt `true` zurueck wenn der Endpunkt bekannt ist und das Event
    /// eingereiht wurde.
    pub fn an_endpoint_senden(&self, endpoint: &EndpointId, event: RelayEvent) -> bool {
        // Sender klonen damit kein Shard-Lock waehrend try_send gehalten wird
        let sender = match self.inner.endpoints.get(endpoint) {
            Some(s) => s.value().clone(),
            None => {
                tracing::debug!(endpoint = %endpoint, "Senden an unbekannten Endpunkt");
                return false;
            }
        };
        sender.senden(event)
    }

    /// Sendet ein Event an mehrere Endpunkte
    ///
    /// Gibt die Anzahl der erfolgreichen Zustellungen zurueck.
    pub fn an_mehrere_senden<'a>(
        &self,
        endpoints: impl IntoIterator<Item = &'a EndpointId>,
        event: &RelayEvent,
    ) -> usize {
        endpoints
            .into_iter()
            .filter(|e| self.an_endpoint_senden(e, event.clone()))
            .count()
    }

    pub fn endpoint_anzahl(&self) -> usize {
        self.inner.endpoints.len()
    }

    pub fn ist_registriert(&self, endpoint: &EndpointId) -> bool {
        self.inner.endpoints.contains_key(endpoint)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
