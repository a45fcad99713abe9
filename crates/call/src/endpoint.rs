//! Endpunkt-Task – besitzt die CallMachine und fuehrt ihre Eingaben zusammen
//!
//! Eingaben kommen aus drei Quellen: Relay-Events (ueber Subscriptions der
//! [`RelayConnection`]), Peer-Events des Media-Peers und Befehle der
//! Anwendung ueber den [`CallHandle`].
//!
//! Lange Negotiation-Schritte (Anruf starten, Offer beantworten, Answer
//! anwenden) laufen unter `tokio::select!`. Ein `end-call` oder lokales
//! Auflegen bricht den Schritt ab. Alle anderen Eingaben werden bis zum Ende
//! des Schritts zurueckgestellt.

use callbridge_core::{CallbridgeError, EndpointId, GroupId, Result, SessionId};
use callbridge_protocol::events::GroupMembership;
use callbridge_protocol::{ChatMessage, ClientEvent, EventName, RelayEvent, SessionDescription};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::machine::{CallConfig, CallMachine, CallState};
use crate::media::{MediaCapture, MediaPeerFactory, PeerEvent, RemoteMediaSink};
use crate::transport::{RelayConnection, Subscription};

/// Kapazitaet des Broadcast-Kanals fuer empfangene Chat-Nachrichten
const NACHRICHTEN_KAPAZITAET: usize = 64;

/// Beobachtbarer Zustand eines Endpunkts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub state: CallState,
    pub session_id: Option<SessionId>,
    pub peer: Option<EndpointId>,
}

impl CallStatus {
    fn idle() -> Self {
        Self {
            state: CallState::Idle,
            session_id: None,
            peer: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Eingaben
// ---------------------------------------------------------------------------

enum Befehl {
    StartCall {
        target: EndpointId,
        antwort: oneshot::Sender<Result<()>>,
    },
    Auflegen,
    Beenden,
}

enum Eingang {
    Befehl(Befehl),
    Relay(RelayEvent),
    Peer(u64, PeerEvent),
    Getrennt,
}

enum Schritt {
    Anrufen(EndpointId, oneshot::Sender<Result<()>>),
    Beantworten(EndpointId, SessionDescription),
    AnswerAnwenden(EndpointId, SessionDescription),
}

/// Wie ein Negotiation-Schritt geendet hat
enum Ausgang {
    Fertig(Result<()>),
    Aufgelegt,
    RemoteEnde,
    Getrennt,
    Beendet,
}

// ---------------------------------------------------------------------------
// CallEndpoint
// ---------------------------------------------------------------------------

/// Der Task eines Endpunkts
pub struct CallEndpoint {
    machine: CallMachine,
    befehle: mpsc::Receiver<Befehl>,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    peer_rx: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
    verbunden: watch::Receiver<bool>,
    getrennt: bool,
    zurueckgestellt: VecDeque<Eingang>,
    status: watch::Sender<CallStatus>,
    nachrichten: broadcast::Sender<ChatMessage>,
    _subscriptions: Vec<Subscription>,
}

impl CallEndpoint {
    /// Startet den Endpunkt-Task auf einer bestehenden Relay-Verbindung
    pub fn starten(
        verbindung: RelayConnection,
        config: CallConfig,
        capture: Arc<dyn MediaCapture>,
        peers: Arc<dyn MediaPeerFactory>,
        sink: Arc<dyn RemoteMediaSink>,
    ) -> CallHandle {
        let (befehle_tx, befehle_rx) = mpsc::channel(32);
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CallStatus::idle());
        let (nachrichten_tx, _) = broadcast::channel(NACHRICHTEN_KAPAZITAET);

        let subscriptions = [
            EventName::Offer,
            EventName::Answer,
            EventName::IceCandidate,
            EventName::EndCall,
            EventName::ReceiveMessage,
        ]
        .into_iter()
        .map(|name| {
            let tx = relay_tx.clone();
            verbindung.on(name, move |event| {
                if tx.send(event).is_err() {
                    tracing::trace!("Endpunkt-Task beendet, Event verworfen");
                }
            })
        })
        .collect();

        let machine = CallMachine::neu(
            config,
            Arc::new(verbindung.clone()),
            capture,
            peers,
            sink,
            peer_tx,
        );

        let endpoint = Self {
            machine,
            verbunden: verbindung.verbunden(),
            befehle: befehle_rx,
            relay_rx,
            peer_rx,
            getrennt: false,
            zurueckgestellt: VecDeque::new(),
            status: status_tx,
            nachrichten: nachrichten_tx.clone(),
            _subscriptions: subscriptions,
        };
        let task = tokio::spawn(endpoint.ausfuehren());

        CallHandle {
            befehle: befehle_tx,
            status: status_rx,
            nachrichten: nachrichten_tx,
            gruppen: Mutex::new(HashSet::new()),
            verbindung,
            task,
        }
    }

    async fn ausfuehren(mut self) {
        tracing::debug!(socket_id = %self.machine.socket_id(), "Endpunkt-Task gestartet");

        while let Some(eingang) = self.naechster_eingang().await {
            let weiter = self.verarbeiten(eingang).await;
            self.status_veroeffentlichen();
            if !weiter {
                break;
            }
        }

        self.machine.end_call().await;
        self.status_veroeffentlichen();
        tracing::debug!(socket_id = %self.machine.socket_id(), "Endpunkt-Task beendet");
    }

    async fn naechster_eingang(&mut self) -> Option<Eingang> {
        if let Some(eingang) = self.zurueckgestellt.pop_front() {
            return Some(eingang);
        }
        let getrennt = self.getrennt;
        tokio::select! {
            biased;
            befehl = self.befehle.recv() => befehl.map(Eingang::Befehl),
            Some(event) = self.relay_rx.recv() => Some(Eingang::Relay(event)),
            Some((generation, event)) = self.peer_rx.recv() => Some(Eingang::Peer(generation, event)),
            _ = self.verbunden.wait_for(|v| !*v), if !getrennt => Some(Eingang::Getrennt),
        }
    }

    /// Gibt `false` zurueck wenn der Task enden soll
    async fn verarbeiten(&mut self, eingang: Eingang) -> bool {
        match eingang {
            Eingang::Befehl(Befehl::StartCall { target, antwort }) => {
                self.schritt(Schritt::Anrufen(target, antwort)).await
            }
            Eingang::Befehl(Befehl::Auflegen) => {
                self.machine.end_call().await;
                true
            }
            Eingang::Befehl(Befehl::Beenden) => false,
            Eingang::Relay(event) => self.relay_event(event).await,
            Eingang::Peer(generation, PeerEvent::LocalCandidate(c)) => {
                self.machine.local_ice_candidate(generation, c).await;
                true
            }
            Eingang::Peer(generation, PeerEvent::RemoteTrack(stream)) => {
                self.machine.remote_track(generation, stream);
                true
            }
            Eingang::Getrennt => {
                self.getrennt_behandeln().await;
                true
            }
        }
    }

    async fn relay_event(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::Offer(offer) => {
                self.schritt(Schritt::Beantworten(offer.from_socket_id, offer.offer))
                    .await
            }
            RelayEvent::Answer(answer) => {
                self.schritt(Schritt::AnswerAnwenden(answer.from_socket_id, answer.answer))
                    .await
            }
            RelayEvent::IceCandidate(c) => {
                self.machine.receive_ice_candidate(c).await;
                true
            }
            RelayEvent::EndCall => {
                self.machine.remote_end_call().await;
                true
            }
            RelayEvent::ReceiveMessage(nachricht) => {
                // Fehler heisst nur: niemand hoert zu
                let _ = self.nachrichten.send(nachricht);
                true
            }
            RelayEvent::Connected(_) | RelayEvent::Ping(_) => true,
        }
    }

    async fn getrennt_behandeln(&mut self) {
        self.getrennt = true;
        tracing::warn!(socket_id = %self.machine.socket_id(), "Verbindung zum Relay verloren");
        self.machine.remote_end_call().await;
    }

    /// Fuehrt einen Negotiation-Schritt aus und stellt andere Eingaben zurueck
    async fn schritt(&mut self, schritt: Schritt) -> bool {
        let Self {
            machine,
            befehle,
            relay_rx,
            peer_rx,
            verbunden,
            getrennt,
            zurueckgestellt,
            status,
            ..
        } = self;

        let mut antwort = None;
        let ausgang = {
            let mut future: Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> = match schritt {
                Schritt::Anrufen(target, tx) => {
                    antwort = Some(tx);
                    Box::pin(machine.start_call(target))
                }
                Schritt::Beantworten(from, offer) => Box::pin(machine.receive_offer(from, offer)),
                Schritt::AnswerAnwenden(from, answer) => {
                    Box::pin(machine.receive_answer(from, answer))
                }
            };
            let getrennt_vorher = *getrennt;

            loop {
                tokio::select! {
                    biased;
                    befehl = befehle.recv() => match befehl {
                        Some(Befehl::Auflegen) => break Ausgang::Aufgelegt,
                        Some(Befehl::Beenden) | None => break Ausgang::Beendet,
                        Some(andere) => zurueckgestellt.push_back(Eingang::Befehl(andere)),
                    },
                    Some(event) = relay_rx.recv() => match event {
                        RelayEvent::EndCall => break Ausgang::RemoteEnde,
                        andere => zurueckgestellt.push_back(Eingang::Relay(andere)),
                    },
                    _ = verbunden.wait_for(|v| !*v), if !getrennt_vorher => break Ausgang::Getrennt,
                    Some((generation, event)) = peer_rx.recv() => {
                        zurueckgestellt.push_back(Eingang::Peer(generation, event));
                    }
                    ergebnis = &mut future => break Ausgang::Fertig(ergebnis),
                }
            }
        };

        let (ergebnis, weiter) = match ausgang {
            Ausgang::Fertig(ergebnis) => (ergebnis, true),
            Ausgang::Aufgelegt => {
                machine.end_call().await;
                (Err(abgebrochen_fehler("lokal aufgelegt")), true)
            }
            Ausgang::RemoteEnde => {
                machine.abort().await;
                (Err(abgebrochen_fehler("Gegenueber hat aufgelegt")), true)
            }
            Ausgang::Getrennt => {
                *getrennt = true;
                machine.abort().await;
                (Err(abgebrochen_fehler("Verbindung getrennt")), true)
            }
            Ausgang::Beendet => (Err(abgebrochen_fehler("Endpunkt beendet")), false),
        };

        if let Err(e) = &ergebnis {
            tracing::debug!(fehler = %e, "Negotiation-Schritt ohne Erfolg");
            if machine.state() == CallState::Idle {
                // Answer und Candidates gehoeren zum beendeten Versuch
                zurueckgestellt.retain(|eingang| {
                    !matches!(
                        eingang,
                        Eingang::Relay(RelayEvent::Answer(_) | RelayEvent::IceCandidate(_))
                    )
                });
            }
        }
        status.send_replace(status_von(machine));
        if let Some(antwort) = antwort {
            // Aufrufer wartet evtl. nicht mehr
            let _ = antwort.send(ergebnis);
        }
        weiter
    }

    fn status_veroeffentlichen(&self) {
        let neu = status_von(&self.machine);
        self.status.send_if_modified(|alt| {
            if *alt == neu {
                return false;
            }
            *alt = neu;
            true
        });
    }
}

fn status_von(machine: &CallMachine) -> CallStatus {
    CallStatus {
        state: machine.state(),
        session_id: machine.session_id().cloned(),
        peer: machine.peer_id().cloned(),
    }
}

fn abgebrochen_fehler(grund: &str) -> CallbridgeError {
    CallbridgeError::NegotiationFailed(format!("abgebrochen: {}", grund))
}

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// Steuerung eines Endpunkts aus der Anwendung
pub struct CallHandle {
    befehle: mpsc::Sender<Befehl>,
    status: watch::Receiver<CallStatus>,
    nachrichten: broadcast::Sender<ChatMessage>,
    /// Gruppen denen dieser Endpunkt beigetreten ist
    gruppen: Mutex<HashSet<GroupId>>,
    verbindung: RelayConnection,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn socket_id(&self) -> &EndpointId {
        self.verbindung.socket_id()
    }

    /// Ruft `target` an und wartet bis das Offer gesendet ist
    pub async fn start_call(&self, target: EndpointId) -> Result<()> {
        let (antwort, ergebnis) = oneshot::channel();
        self.befehl(Befehl::StartCall { target, antwort }).await?;
        ergebnis.await.map_err(|_| task_beendet())?
    }

    /// Legt auf (oder lehnt ein eingehendes Offer ab)
    pub async fn end_call(&self) -> Result<()> {
        self.befehl(Befehl::Auflegen).await
    }

    /// Sendet eine Nachricht an `group`
    ///
    /// Als Mitglied kommt die eigene Nachricht vom Relay zurueck. Ohne
    /// Mitgliedschaft wird sie direkt auf [`messages`](Self::messages)
    /// veroeffentlicht.
    pub async fn send_group_message(
        &self,
        group: GroupId,
        content: impl Into<String>,
    ) -> Result<()> {
        let nachricht = ChatMessage {
            group_id: group,
            message_content: content.into(),
            sender_socket_id: self.socket_id().clone(),
        };
        let mitglied = self.gruppen.lock().contains(&nachricht.group_id);
        self.verbindung
            .send(ClientEvent::SendMessageGroup(nachricht.clone()))
            .await?;

        if !mitglied && self.nachrichten.send(nachricht).is_err() {
            tracing::trace!("Keine Empfaenger fuer eigene Nachricht");
        }
        Ok(())
    }

    pub async fn join_group(&self, group: GroupId) -> Result<()> {
        self.verbindung
            .send(ClientEvent::JoinGroup(GroupMembership {
                group_id: group.clone(),
            }))
            .await?;
        self.gruppen.lock().insert(group);
        Ok(())
    }

    pub async fn leave_group(&self, group: GroupId) -> Result<()> {
        self.verbindung
            .send(ClientEvent::LeaveGroup(GroupMembership {
                group_id: group.clone(),
            }))
            .await?;
        self.gruppen.lock().remove(&group);
        Ok(())
    }

    pub fn state(&self) -> CallState {
        self.status.borrow().state
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// Empfangene Gruppen-Nachrichten
    pub fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.nachrichten.subscribe()
    }

    /// Beendet den Endpunkt-Task und schliesst die Verbindung
    ///
    /// Ein laufender Call wird vorher aufgelegt.
    pub async fn shutdown(self) {
        if self.befehle.send(Befehl::Beenden).await.is_err() {
            tracing::debug!("Endpunkt-Task bereits beendet");
        }
        if let Err(e) = self.task.await {
            tracing::warn!(fehler = %e, "Endpunkt-Task abgebrochen");
        }
        self.verbindung.close().await;
    }

    async fn befehl(&self, befehl: Befehl) -> Result<()> {
        self.befehle.send(befehl).await.map_err(|_| task_beendet())
    }
}

fn task_beendet() -> CallbridgeError {
    CallbridgeError::Getrennt("Endpunkt-Task beendet".into())
}
