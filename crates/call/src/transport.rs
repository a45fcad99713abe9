//! Client-seitige Verbindung zum Callbridge-Relay
//!
//! Nutzt den `EndpointCodec` aus callbridge-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Eingehende Events werden pro Event-Name an
//! hoechstens einen Handler verteilt. Ein neuer Handler ersetzt den alten.
//!
//! Intern laufen zwei Tasks: ein Schreiber, der die Send-Queue abarbeitet,
//! und ein Leser, der Frames dekodiert, Pings beantwortet und Handler aufruft.

use async_trait::async_trait;
use callbridge_core::{EndpointId, Result};
use callbridge_protocol::events::PongMessage;
use callbridge_protocol::{ClientEvent, EndpointCodec, EventName, ProtocolError, RelayEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::error::{TransportError, TransportResult};

/// Wartezeit auf das `connected`-Event nach dem Verbindungsaufbau
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Groesse der ausgehenden Queue
const SEND_QUEUE_GROESSE: usize = 64;

/// Handler fuer ein eingehendes Event
///
/// Wird im Leser-Task aufgerufen und darf nicht blockieren.
pub type EventHandler = Arc<dyn Fn(RelayEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// SignalTransport
// ---------------------------------------------------------------------------

/// Sende-Seite des Signaling-Kanals, wie sie die Call-State-Machine sieht
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<()>;

    /// Vom Relay vergebene eigene ID
    fn socket_id(&self) -> &EndpointId;
}

// ---------------------------------------------------------------------------
// RelayConnection
// ---------------------------------------------------------------------------

struct HandlerEintrag {
    id: u64,
    handler: EventHandler,
}

struct Inner {
    socket_id: EndpointId,
    ausgehend: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    handler: Mutex<HashMap<EventName, HandlerEintrag>>,
    naechste_handler_id: AtomicU64,
    verbunden: watch::Sender<bool>,
    schreiber: Mutex<Option<JoinHandle<()>>>,
    leser: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(leser) = self.leser.lock().take() {
            leser.abort();
        }
    }
}

/// Verbindung eines Endpunkts zum Relay
///
/// Clone teilt die Verbindung. Die Tasks enden mit `close()` oder wenn die
/// letzte Kopie gedroppt wird.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<Inner>,
}

impl RelayConnection {
    /// Baut eine TCP-Verbindung zum Relay auf und wartet auf `connected`
    pub async fn connect(addr: impl ToSocketAddrs) -> TransportResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::ueber_stream(stream).await
    }

    /// Wie [`connect`](Self::connect), aber ueber einen bestehenden Stream
    pub async fn ueber_stream<S>(stream: S) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut framed = Framed::new(stream, EndpointCodec::new());

        let socket_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(Ok(RelayEvent::Connected(info))))) => info.socket_id,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Err(TransportError::Geschlossen),
            Ok(Some(Ok(andere))) => {
                tracing::warn!(event = ?andere.map(|e| e.name()), "Unerwartetes erstes Event");
                return Err(TransportError::KeinConnected);
            }
            Err(_) => return Err(TransportError::KeinConnected),
        };

        let (sink, stream) = framed.split();
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        let (verbunden, _) = watch::channel(true);

        let inner = Arc::new(Inner {
            socket_id: socket_id.clone(),
            ausgehend: Mutex::new(Some(tx)),
            handler: Mutex::new(HashMap::new()),
            naechste_handler_id: AtomicU64::new(1),
            verbunden,
            schreiber: Mutex::new(None),
            leser: Mutex::new(None),
        });

        let schreiber = tokio::spawn(schreiben(sink, rx));
        let leser = tokio::spawn(lesen(stream, Arc::downgrade(&inner)));
        *inner.schreiber.lock() = Some(schreiber);
        *inner.leser.lock() = Some(leser);

        tracing::info!(socket_id = %socket_id, "Mit Relay verbunden");
        Ok(Self { inner })
    }

    pub fn socket_id(&self) -> &EndpointId {
        &self.inner.socket_id
    }

    /// Reiht ein Event in die Send-Queue ein
    pub async fn send(&self, event: ClientEvent) -> TransportResult<()> {
        let tx = self
            .inner
            .ausgehend
            .lock()
            .clone()
            .ok_or(TransportError::Geschlossen)?;
        tx.send(event).await.map_err(|_| TransportError::Geschlossen)
    }

    /// Registriert `handler` fuer `name`
    ///
    /// Ein bereits registrierter Handler fuer denselben Namen wird ersetzt.
    /// Die Registrierung gilt bis die zurueckgegebene [`Subscription`]
    /// gedroppt oder [`off`](Self::off) aufgerufen wird.
    pub fn on<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        let id = self.inner.naechste_handler_id.fetch_add(1, Ordering::Relaxed);
        let ersetzt = self
            .inner
            .handler
            .lock()
            .insert(
                name,
                HandlerEintrag {
                    id,
                    handler: Arc::new(handler),
                },
            )
            .is_some();
        if ersetzt {
            tracing::debug!(event = %name, "Handler ersetzt");
        }
        Subscription {
            inner: Arc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Entfernt den Handler fuer `name`
    pub fn off(&self, name: EventName) {
        self.inner.handler.lock().remove(&name);
    }

    pub fn hat_handler(&self, name: EventName) -> bool {
        self.inner.handler.lock().contains_key(&name)
    }

    /// Beobachtet den Verbindungszustand (`false` sobald getrennt)
    pub fn verbunden(&self) -> watch::Receiver<bool> {
        self.inner.verbunden.subscribe()
    }

    pub fn ist_verbunden(&self) -> bool {
        *self.inner.verbunden.borrow()
    }

    /// Schliesst die Verbindung
    ///
    /// Bereits eingereihte Events werden noch geschrieben.
    pub async fn close(&self) {
        drop(self.inner.ausgehend.lock().take());

        let schreiber = self.inner.schreiber.lock().take();
        if let Some(schreiber) = schreiber {
            if let Err(e) = schreiber.await {
                tracing::debug!(fehler = %e, "Schreiber-Task abgebrochen");
            }
        }
        if let Some(leser) = self.inner.leser.lock().take() {
            leser.abort();
        }
        self.inner.verbunden.send_replace(false);
        tracing::info!(socket_id = %self.inner.socket_id, "Verbindung zum Relay geschlossen");
    }
}

#[async_trait]
impl SignalTransport for RelayConnection {
    async fn send(&self, event: ClientEvent) -> Result<()> {
        RelayConnection::send(self, event).await.map_err(Into::into)
    }

    fn socket_id(&self) -> &EndpointId {
        RelayConnection::socket_id(self)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Registrierung eines Handlers, wird beim Drop aufgehoben
///
/// Wurde der Handler inzwischen ersetzt, bleibt der neue bestehen.
#[must_use = "der Handler wird beim Drop der Subscription entfernt"]
pub struct Subscription {
    inner: Weak<Inner>,
    name: EventName,
    id: u64,
}

impl Subscription {
    pub fn event_name(&self) -> EventName {
        self.name
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut handler = inner.handler.lock();
            if handler.get(&self.name).is_some_and(|e| e.id == self.id) {
                handler.remove(&self.name);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn schreiben<S>(
    mut sink: SplitSink<Framed<S, EndpointCodec>, ClientEvent>,
    mut rx: mpsc::Receiver<ClientEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let name = event.name();
        if let Err(e) = sink.send(event).await {
            if e.ist_fatal() {
                tracing::warn!(fehler = %e, "Schreiben zum Relay fehlgeschlagen");
                break;
            }
            tracing::warn!(event = %name, fehler = %e, "Event verworfen");
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(fehler = %e, "Schliessen des Streams fehlgeschlagen");
    }
}

async fn lesen<S>(mut stream: SplitStream<Framed<S, EndpointCodec>>, inner: Weak<Inner>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match frame {
            Ok(Ok(event)) => verteilen(&inner, event),
            Ok(Err(e)) => {
                tracing::warn!(fehler = %e, "Ungueltiger Frame vom Relay verworfen");
            }
            Err(e) => {
                lesefehler_loggen(&e);
                break;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        tracing::info!(socket_id = %inner.socket_id, "Relay hat die Verbindung getrennt");
        inner.verbunden.send_replace(false);
    }
}

fn verteilen(inner: &Inner, event: RelayEvent) {
    if let RelayEvent::Ping(ping) = &event {
        let pong = ClientEvent::Pong(PongMessage {
            echo_timestamp_ms: ping.timestamp_ms,
        });
        if let Some(tx) = inner.ausgehend.lock().as_ref() {
            if tx.try_send(pong).is_err() {
                tracing::debug!("Pong nicht gesendet (Queue voll oder geschlossen)");
            }
        }
    }

    let name = event.name();
    // Handler klonen damit kein Lock waehrend des Aufrufs gehalten wird
    let handler = inner.handler.lock().get(&name).map(|e| e.handler.clone());
    match handler {
        Some(handler) => handler(event),
        None => tracing::trace!(event = %name, "Kein Handler registriert"),
    }
}

fn lesefehler_loggen(e: &ProtocolError) {
    match e {
        ProtocolError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::debug!("Relay-Stream beendet");
        }
        andere => tracing::warn!(fehler = %andere, "Lesefehler auf Relay-Verbindung"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_protocol::events::{ConnectedInfo, PingMessage};
    use callbridge_protocol::RelayCodec;
    use tokio::io::DuplexStream;

    type RelaySeite = Framed<DuplexStream, RelayCodec>;

    async fn verbinden() -> (RelayConnection, RelaySeite) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let mut relay = Framed::new(server, RelayCodec::new());
        relay
            .send(RelayEvent::Connected(ConnectedInfo {
                socket_id: "ich".into(),
            }))
            .await
            .unwrap();
        let verbindung = RelayConnection::ueber_stream(client).await.unwrap();
        (verbindung, relay)
    }

    async fn naechstes(relay: &mut RelaySeite) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), relay.next())
            .await
            .expect("Timeout")
            .expect("Stream beendet")
            .expect("Lesefehler")
            .expect("Ungueltiges Event")
    }

    #[tokio::test]
    async fn uebernimmt_socket_id_aus_connected() {
        let (verbindung, _relay) = verbinden().await;
        assert_eq!(verbindung.socket_id().as_str(), "ich");
        assert!(verbindung.ist_verbunden());
    }

    #[tokio::test]
    async fn anderes_erstes_event_wird_abgelehnt() {
        let (client, server) = tokio::io::duplex(1024);
        let mut relay = Framed::new(server, RelayCodec::new());
        relay.send(RelayEvent::EndCall).await.unwrap();

        let ergebnis = RelayConnection::ueber_stream(client).await;
        assert!(matches!(ergebnis, Err(TransportError::KeinConnected)));
    }

    #[tokio::test]
    async fn senden_kommt_beim_relay_an() {
        let (verbindung, mut relay) = verbinden().await;
        verbindung.send(ClientEvent::EndCall).await.unwrap();
        assert_eq!(naechstes(&mut relay).await, ClientEvent::EndCall);
    }

    #[tokio::test]
    async fn handler_ersetzt_vorgaenger() {
        let (verbindung, mut relay) = verbinden().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_alt = tx.clone();
        let _alt = verbindung.on(EventName::EndCall, move |_| {
            let _ = tx_alt.send("alt");
        });
        let _neu = verbindung.on(EventName::EndCall, move |_| {
            let _ = tx.send("neu");
        });

        relay.send(RelayEvent::EndCall).await.unwrap();
        let empfangen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(empfangen, "neu");
    }

    #[tokio::test]
    async fn drop_der_alten_subscription_laesst_neuen_handler_stehen() {
        let (verbindung, _relay) = verbinden().await;
        let alt = verbindung.on(EventName::Offer, |_| {});
        let _neu = verbindung.on(EventName::Offer, |_| {});

        drop(alt);
        assert!(verbindung.hat_handler(EventName::Offer));
    }

    #[tokio::test]
    async fn drop_der_subscription_entfernt_handler() {
        let (verbindung, _relay) = verbinden().await;
        let sub = verbindung.on(EventName::Answer, |_| {});
        assert!(verbindung.hat_handler(EventName::Answer));
        drop(sub);
        assert!(!verbindung.hat_handler(EventName::Answer));

        let _sub = verbindung.on(EventName::Answer, |_| {});
        verbindung.off(EventName::Answer);
        assert!(!verbindung.hat_handler(EventName::Answer));
    }

    #[tokio::test]
    async fn ping_wird_automatisch_beantwortet() {
        let (_verbindung, mut relay) = verbinden().await;
        relay
            .send(RelayEvent::Ping(PingMessage { timestamp_ms: 42 }))
            .await
            .unwrap();

        match naechstes(&mut relay).await {
            ClientEvent::Pong(p) => assert_eq!(p.echo_timestamp_ms, 42),
            andere => panic!("Erwartet Pong, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn trennung_durch_relay_wird_gemeldet() {
        let (verbindung, relay) = verbinden().await;
        let mut verbunden = verbindung.verbunden();
        drop(relay);

        tokio::time::timeout(Duration::from_secs(2), verbunden.wait_for(|v| !*v))
            .await
            .expect("Trennung nicht erkannt")
            .unwrap();
        assert!(!verbindung.ist_verbunden());
    }

    #[tokio::test]
    async fn close_schreibt_ausstehende_events() {
        let (verbindung, mut relay) = verbinden().await;
        verbindung.send(ClientEvent::EndCall).await.unwrap();
        verbindung.close().await;

        assert_eq!(naechstes(&mut relay).await, ClientEvent::EndCall);
        assert!(relay.next().await.is_none(), "Stream muss danach enden");
        assert!(matches!(
            verbindung.send(ClientEvent::EndCall).await,
            Err(TransportError::Geschlossen)
        ));
    }
}
