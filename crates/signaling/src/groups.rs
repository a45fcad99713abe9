//! Gruppen-Relay – Chat-Nachrichten an alle Mitglieder einer Gruppe
//!
//! Unabhaengig vom Session-Zustand. Zustellung ist best-effort: keine
//! Bestaetigung, keine Reihenfolge zwischen Empfaengern. Der Absender
//! bekommt die Nachricht selbst, wenn er Mitglied ist.

use callbridge_core::{EndpointId, GroupId};
use callbridge_protocol::{ChatMessage, RelayEvent};
use dashmap::DashMap;
use std::sync::Arc;

use crate::broadcast::EventBroadcaster;

/// Gruppen-Mitgliedschaften und Fan-out
#[derive(Clone)]
pub struct GroupRelay {
    inner: Arc<GroupRelayInner>,
}

struct GroupRelayInner {
    /// Gruppe -> Mitglieder in Beitrittsreihenfolge
    groups: DashMap<GroupId, Vec<EndpointId>>,
    broadcaster: EventBroadcaster,
}

impl GroupRelay {
    pub fn neu(broadcaster: EventBroadcaster) -> Self {
        Self {
            inner: Arc::new(GroupRelayInner {
                groups: DashMap::new(),
                broadcaster,
            }),
        }
    }

    /// Traegt `endpoint` in `group` ein
    ///
    /// Gibt `false` zurueck wenn er bereits Mitglied war.
    pub fn join(&self, group: GroupId, endpoint: EndpointId) -> bool {
        let mut mitglieder = self.inner.groups.entry(group.clone()).or_default();
        if mitglieder.contains(&endpoint) {
            return false;
        }
        tracing::debug!(gruppe = %group, endpoint = %endpoint, "Gruppe beigetreten");
        mitglieder.push(endpoint);
        true
    }

    /// Entfernt `endpoint` aus `group`; leere Gruppen verschwinden
    pub fn leave(&self, group: &GroupId, endpoint: &EndpointId) -> bool {
        let entfernt = match self.inner.groups.get_mut(group) {
            Some(mut mitglieder) => {
                let vorher = mitglieder.len();
                mitglieder.retain(|m| m != endpoint);
                vorher != mitglieder.len()
            }
            None => false,
        };
        self.inner.groups.remove_if(group, |_, m| m.is_empty());
        entfernt
    }

    /// Entfernt `endpoint` aus allen Gruppen (Verbindungsende)
    pub fn leave_all(&self, endpoint: &EndpointId) {
        self.inner.groups.iter_mut().for_each(|mut entry| {
            entry.value_mut().retain(|m| m != endpoint);
        });
        self.inner.groups.retain(|_, m| !m.is_empty());
    }

    pub fn members(&self, group: &GroupId) -> Vec<EndpointId> {
        self.inner
            .groups
            .get(group)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    pub fn group_anzahl(&self) -> usize {
        self.inner.groups.len()
    }

    /// Verteilt `message` als `receive-message` an alle Mitglieder der Gruppe
    ///
    /// Gibt die Anzahl der erfolgreichen Zustellungen zurueck.
    pub fn send_to_group(&self, message: ChatMessage) -> usize {
        // Momentaufnahme, damit waehrend der Zustellung kein Lock gehalten wird
        let mitglieder = self.members(&message.group_id);
        if mitglieder.is_empty() {
            tracing::debug!(gruppe = %message.group_id, "Nachricht an leere Gruppe");
            return 0;
        }

        let gruppe = message.group_id.clone();
        let zugestellt = self
            .inner
            .broadcaster
            .an_mehrere_senden(&mitglieder, &RelayEvent::ReceiveMessage(message));

        tracing::trace!(
            gruppe = %gruppe,
            mitglieder = mitglieder.len(),
            zugestellt,
            "Gruppen-Nachricht verteilt"
        );
        zugestellt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nachricht(gruppe: &str, von: &str) -> ChatMessage {
        ChatMessage {
            group_id: gruppe.into(),
            message_content: "hallo".into(),
            sender_socket_id: von.into(),
        }
    }

    #[tokio::test]
    async fn fan_out_inklusive_absender() {
        let broadcaster = EventBroadcaster::neu();
        let relay = GroupRelay::neu(broadcaster.clone());

        let mut rx_a = broadcaster.endpoint_registrieren("A".into());
        let mut rx_b = broadcaster.endpoint_registrieren("B".into());
        let mut rx_c = broadcaster.endpoint_registrieren("C".into());

        relay.join("g1".into(), "A".into());
        relay.join("g1".into(), "B".into());
        relay.join("g2".into(), "C".into());

        assert_eq!(relay.send_to_group(nachricht("g1", "A")), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                RelayEvent::ReceiveMessage(m) => {
                    assert_eq!(m.message_content, "hallo");
                    assert_eq!(m.sender_socket_id.as_str(), "A");
                }
                andere => panic!("Erwartet ReceiveMessage, erhalten: {:?}", andere),
            }
        }
        assert!(rx_c.try_recv().is_err(), "C ist nicht in g1");
    }

    #[test]
    fn doppelter_beitritt_zaehlt_einmal() {
        let relay = GroupRelay::neu(EventBroadcaster::neu());
        assert!(relay.join("g".into(), "A".into()));
        assert!(!relay.join("g".into(), "A".into()));
        assert_eq!(relay.members(&"g".into()).len(), 1);
    }

    #[test]
    fn verlassen_raeumt_leere_gruppen_auf() {
        let relay = GroupRelay::neu(EventBroadcaster::neu());
        relay.join("g".into(), "A".into());
        assert!(relay.leave(&"g".into(), &"A".into()));
        assert!(!relay.leave(&"g".into(), &"A".into()));
        assert_eq!(relay.group_anzahl(), 0);
    }

    #[test]
    fn leave_all_entfernt_aus_jeder_gruppe() {
        let relay = GroupRelay::neu(EventBroadcaster::neu());
        relay.join("g1".into(), "A".into());
        relay.join("g2".into(), "A".into());
        relay.join("g2".into(), "B".into());

        relay.leave_all(&"A".into());
        assert!(relay.members(&"g1".into()).is_empty());
        assert_eq!(relay.members(&"g2".into()), vec![EndpointId::from("B")]);
        assert_eq!(relay.group_anzahl(), 1);
    }

    #[test]
    fn leere_gruppe_stellt_nichts_zu() {
        let relay = GroupRelay::neu(EventBroadcaster::neu());
        assert_eq!(relay.send_to_group(nachricht("niemand", "A")), 0);
    }
}
