//! Client-Connection – Verwaltet eine einzelne Verbindung zum Relay
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Die erste Nachricht an den Endpunkt ist immer `connected`
//! mit seiner Verbindungs-ID.
//!
//! ## Keepalive
//! - Relay sendet alle `keepalive_sek` einen Ping
//! - Ohne eingehenden Frame innerhalb von `verbindungs_timeout_sek` wird
//!   die Verbindung getrennt
//!
//! ## Aufraeumen
//! Verbindungsende wirkt wie ein implizites `end-call`: offene Sessions
//! werden entfernt und die Gegenstellen benachrichtigt.

use callbridge_core::EndpointId;
use callbridge_protocol::events::ConnectedInfo;
use callbridge_protocol::{ProtocolError, RelayCodec, RelayEvent};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::MessageDispatcher;
use crate::server_state::SignalingState;

/// Verarbeitet eine einzelne Verbindung
///
/// Liest Frames via `RelayCodec`, gibt sie an den `MessageDispatcher` und
/// schreibt die Send-Queue des Endpunkts auf den Stream.
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    endpoint: EndpointId,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection mit frischer Verbindungs-ID
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            endpoint: EndpointId::neu(),
        }
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird, der Keepalive-Timeout
    /// greift oder ein Shutdown-Signal eingeht.
    pub async fn verarbeiten<S>(self, stream: S, shutdown_rx: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!(peer = %self.peer_addr, endpoint = %self.endpoint, "Neue Verbindung");

        let mut framed = Framed::new(
            stream,
            RelayCodec::with_max_size(self.state.config.max_frame_groesse),
        );

        let sende_rx = self
            .state
            .broadcaster
            .endpoint_registrieren(self.endpoint.clone());
        self.endpoints_gauge_aktualisieren();

        let begruessung = RelayEvent::Connected(ConnectedInfo {
            socket_id: self.endpoint.clone(),
        });
        match framed.send(begruessung).await {
            Ok(()) => self.schleife(&mut framed, sende_rx, shutdown_rx).await,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, fehler = %e, "connected nicht sendbar");
            }
        }

        self.aufraeumen();
        tracing::info!(peer = %self.peer_addr, endpoint = %self.endpoint, "Verbindungs-Task beendet");
    }

    async fn schleife<S>(
        &self,
        framed: &mut Framed<S, RelayCodec>,
        mut sende_rx: mpsc::Receiver<RelayEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek.max(1));
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        loop {
            let timeout_zeitpunkt = letzter_empfang + timeout_dauer;
            let weckzeit = naechster_ping.min(timeout_zeitpunkt);

            tokio::select! {
                // Eingehendes Event vom Endpunkt
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Ok(event))) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(
                                endpoint = %self.endpoint,
                                event = %event.name(),
                                "Event empfangen"
                            );
                            dispatcher.dispatch(&self.endpoint, event);
                        }
                        Some(Ok(Err(e))) => {
                            letzter_empfang = Instant::now();
                            dispatcher.ungueltiger_frame(&self.endpoint, &e);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Endpunkt getrennt");
                            break;
                        }
                    }
                }

                // Ausgehendes Event aus dem Broadcaster
                ausgehend = sende_rx.recv() => {
                    let Some(event) = ausgehend else {
                        break;
                    };
                    match framed.send(event).await {
                        Ok(()) => {}
                        Err(e @ ProtocolError::Io(_)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                endpoint = %self.endpoint,
                                fehler = %e,
                                "Event nicht kodierbar – verworfen"
                            );
                        }
                    }
                }

                // Keepalive-Ping und Timeout
                _ = tokio::time::sleep_until(weckzeit) => {
                    let jetzt = Instant::now();
                    if jetzt >= timeout_zeitpunkt {
                        tracing::warn!(peer = %peer_addr, endpoint = %self.endpoint, "Verbindungs-Timeout");
                        break;
                    }
                    if jetzt >= naechster_ping {
                        if let Err(e) = framed.send(RelayEvent::ping_jetzt()).await {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = jetzt + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break;
                    }
                }
            }
        }
    }

    /// Entfernt den Endpunkt aus allen geteilten Strukturen
    ///
    /// Der Broadcaster-Eintrag verschwindet zuerst, damit keine neue Offer
    /// mehr an diesen Endpunkt zugestellt werden kann.
    fn aufraeumen(&self) {
        self.state.broadcaster.endpoint_entfernen(&self.endpoint);
        let beendet = self.state.router.endpoint_disconnected(&self.endpoint);
        self.state.groups.leave_all(&self.endpoint);
        self.endpoints_gauge_aktualisieren();

        tracing::debug!(
            endpoint = %self.endpoint,
            sessions_beendet = beendet,
            "Endpunkt aufgeraeumt"
        );
    }

    fn endpoints_gauge_aktualisieren(&self) {
        self.state
            .metriken
            .connected_endpoints
            .set(self.state.broadcaster.endpoint_anzahl() as i64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use callbridge_observability::CallbridgeMetrics;
    use callbridge_protocol::events::{AnswerRequest, GroupMembership, OfferRequest};
    use callbridge_protocol::{
        ChatMessage, ClientEvent, EndpointCodec, SdpType, SessionDescription,
    };
    use tokio::io::DuplexStream;

    type Client = Framed<DuplexStream, EndpointCodec>;

    fn state(config: SignalingConfig) -> Arc<SignalingState> {
        SignalingState::neu(config, CallbridgeMetrics::neu().unwrap())
    }

    /// Startet eine Verbindung ueber einen In-Memory-Stream
    async fn verbinden(
        state: &Arc<SignalingState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Client, EndpointId, tokio::task::JoinHandle<()>) {
        let (server_seite, client_seite) = tokio::io::duplex(64 * 1024);
        let verbindung = ClientConnection::neu(Arc::clone(state), "127.0.0.1:9".parse().unwrap());
        let task = tokio::spawn(verbindung.verarbeiten(server_seite, shutdown_rx));

        let mut client = Framed::new(client_seite, EndpointCodec::new());
        let id = match client.next().await.unwrap().unwrap().unwrap() {
            RelayEvent::Connected(info) => info.socket_id,
            andere => panic!("Erwartet connected, erhalten: {:?}", andere),
        };
        (client, id, task)
    }

    async fn naechstes(client: &mut Client) -> RelayEvent {
        loop {
            match client.next().await.unwrap().unwrap().unwrap() {
                RelayEvent::Ping(_) => continue,
                event => return event,
            }
        }
    }

    #[tokio::test]
    async fn connected_ist_erste_nachricht() {
        let state = state(SignalingConfig::default());
        let (_tx, rx) = watch::channel(false);
        let (_client, id, _task) = verbinden(&state, rx).await;

        assert!(state.broadcaster.ist_registriert(&id));
        assert_eq!(state.metriken.connected_endpoints.get(), 1);
    }

    #[tokio::test]
    async fn call_ueber_zwei_verbindungen() {
        let state = state(SignalingConfig::default());
        let (_tx, rx) = watch::channel(false);
        let (mut a, id_a, _ta) = verbinden(&state, rx.clone()).await;
        let (mut b, id_b, _tb) = verbinden(&state, rx).await;

        a.send(ClientEvent::Offer(OfferRequest {
            from: id_a.clone(),
            to: id_b.clone(),
            offer: SessionDescription::new(SdpType::Offer, "o"),
        }))
        .await
        .unwrap();

        match naechstes(&mut b).await {
            RelayEvent::Offer(o) => assert_eq!(o.from_socket_id, id_a),
            andere => panic!("Erwartet Offer, erhalten: {:?}", andere),
        }

        b.send(ClientEvent::Answer(AnswerRequest {
            to_socket_id: id_a.clone(),
            answer: SessionDescription::new(SdpType::Answer, "a"),
        }))
        .await
        .unwrap();

        match naechstes(&mut a).await {
            RelayEvent::Answer(ans) => assert_eq!(ans.from_socket_id, id_b),
            andere => panic!("Erwartet Answer, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn trennung_sendet_end_call_an_gegenstelle() {
        let state = state(SignalingConfig::default());
        let (_tx, rx) = watch::channel(false);
        let (mut a, id_a, task_a) = verbinden(&state, rx.clone()).await;
        let (mut b, id_b, _tb) = verbinden(&state, rx).await;

        a.send(ClientEvent::JoinGroup(GroupMembership {
            group_id: "g1".into(),
        }))
        .await
        .unwrap();
        a.send(ClientEvent::Offer(OfferRequest {
            from: id_a.clone(),
            to: id_b.clone(),
            offer: SessionDescription::new(SdpType::Offer, "o"),
        }))
        .await
        .unwrap();
        assert!(matches!(naechstes(&mut b).await, RelayEvent::Offer(_)));

        drop(a);
        task_a.await.unwrap();

        assert_eq!(naechstes(&mut b).await, RelayEvent::EndCall);
        assert!(state.registry.is_empty());
        assert!(!state.broadcaster.ist_registriert(&id_a));
        assert!(state.groups.members(&"g1".into()).is_empty());
        assert_eq!(state.metriken.connected_endpoints.get(), 1);
    }

    #[tokio::test]
    async fn kaputter_frame_beendet_verbindung_nicht() {
        let state = state(SignalingConfig::default());
        let (_tx, rx) = watch::channel(false);
        let (mut a, id_a, _ta) = verbinden(&state, rx).await;

        roh_senden(&mut a, br#"{"event":"gibt-es-nicht"}"#).await;
        a.send(ClientEvent::JoinGroup(GroupMembership {
            group_id: "g".into(),
        }))
        .await
        .unwrap();
        a.send(ClientEvent::SendMessageGroup(ChatMessage {
            group_id: "g".into(),
            message_content: "noch da".into(),
            sender_socket_id: id_a.clone(),
        }))
        .await
        .unwrap();

        match naechstes(&mut a).await {
            RelayEvent::ReceiveMessage(m) => assert_eq!(m.message_content, "noch da"),
            andere => panic!("Erwartet ReceiveMessage, erhalten: {:?}", andere),
        }
        assert_eq!(
            state
                .metriken
                .routing_errors_total
                .with_label_values(&["invalid_event"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_trennt_verbindung() {
        let state = state(SignalingConfig::default());
        let (tx, rx) = watch::channel(false);
        let (mut a, _id, task) = verbinden(&state, rx).await;

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(a.next().await.is_none());
        assert_eq!(state.broadcaster.endpoint_anzahl(), 0);
    }

    #[tokio::test]
    async fn stummer_endpunkt_laeuft_in_timeout() {
        let state = state(SignalingConfig {
            keepalive_sek: 1,
            verbindungs_timeout_sek: 2,
            ..SignalingConfig::default()
        });
        let (_tx, rx) = watch::channel(false);
        let (mut a, _id, task) = verbinden(&state, rx).await;

        let mut pings = 0;
        while let Some(frame) = a.next().await {
            if let RelayEvent::Ping(_) = frame.unwrap().unwrap() {
                pings += 1;
            }
        }
        task.await.unwrap();
        assert!(pings >= 1);
        assert_eq!(state.broadcaster.endpoint_anzahl(), 0);
    }

    /// Schreibt ungepruefte Bytes als Frame
    async fn roh_senden(client: &mut Client, payload: &[u8]) {
        use tokio::io::AsyncWriteExt;

        let stream = client.get_mut();
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }
}
