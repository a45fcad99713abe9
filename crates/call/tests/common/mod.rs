//! Gemeinsame Hilfen fuer die Integration-Tests: Relay auf Loopback und
//! Fake-Medien

#![allow(dead_code)]

use async_trait::async_trait;
use callbridge_call::{
    CallConfig, CallEndpoint, CallHandle, CallState, CallStatus, MediaCapture, MediaConstraints,
    MediaPeer, MediaPeerFactory, MediaStream, PeerConfig, PeerEventSender, RelayConnection,
    RemoteMediaSink,
};
use callbridge_core::{CallbridgeError, EndpointId, Result};
use callbridge_observability::CallbridgeMetrics;
use callbridge_protocol::{IceCandidate, SdpType, SessionDescription};
use callbridge_signaling::{SignalingConfig, SignalingServer, SignalingState};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

pub struct Relay {
    pub adresse: SocketAddr,
    pub state: Arc<SignalingState>,
    shutdown: watch::Sender<bool>,
}

impl Relay {
    pub async fn starten() -> Self {
        let metriken = CallbridgeMetrics::neu().expect("Metriken konnten nicht erstellt werden");
        let state = SignalingState::neu(SignalingConfig::default(), metriken);
        let server = SignalingServer::binden(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .expect("Relay konnte nicht binden");
        let adresse = server.lokale_adresse().unwrap();

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.starten(shutdown_rx));

        Self {
            adresse,
            state,
            shutdown,
        }
    }

    pub fn stoppen(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wartet bis `bedingung` auf dem Relay-Zustand erfuellt ist
    pub async fn warte_bis(&self, bedingung: impl Fn(&SignalingState) -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !bedingung(&self.state) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Relay-Zustand nicht erreicht");
    }
}

// ---------------------------------------------------------------------------
// Fake-Medien
// ---------------------------------------------------------------------------

/// Capture, Peer-Factory und Sink in einem, mit gemeinsamem Protokoll
pub struct Medien {
    name: String,
    protokoll: Arc<Mutex<Vec<String>>>,
    /// Haelt `create_answer` an bis von aussen freigegeben
    answer_sperre: Option<Arc<Notify>>,
    /// Meldet dass `create_answer` erreicht wurde
    pub answer_erreicht: Arc<Notify>,
    /// `create_answer` schlaegt fehl
    answer_fehler: bool,
}

impl Medien {
    pub fn neu(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            protokoll: Arc::new(Mutex::new(Vec::new())),
            answer_sperre: None,
            answer_erreicht: Arc::new(Notify::new()),
            answer_fehler: false,
        })
    }

    /// Medien die keine Answer erzeugen koennen
    pub fn mit_fehlschlagender_answer(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            protokoll: Arc::new(Mutex::new(Vec::new())),
            answer_sperre: None,
            answer_erreicht: Arc::new(Notify::new()),
            answer_fehler: true,
        })
    }

    /// Medien deren `create_answer` nie fertig wird
    pub fn mit_haengender_answer(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            protokoll: Arc::new(Mutex::new(Vec::new())),
            answer_sperre: Some(Arc::new(Notify::new())),
            answer_erreicht: Arc::new(Notify::new()),
            answer_fehler: false,
        })
    }

    pub fn protokoll(&self) -> Vec<String> {
        self.protokoll.lock().clone()
    }

    pub fn enthaelt(&self, eintrag: &str) -> bool {
        self.protokoll.lock().iter().any(|e| e == eintrag)
    }

    pub async fn warte_auf(&self, eintrag: &str) {
        let ergebnis = tokio::time::timeout(TIMEOUT, async {
            while !self.enthaelt(eintrag) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            ergebnis.is_ok(),
            "{}: '{}' fehlt in {:?}",
            self.name,
            eintrag,
            self.protokoll()
        );
    }

    fn log(&self, eintrag: String) {
        self.protokoll.lock().push(eintrag);
    }
}

#[async_trait]
impl MediaCapture for Medien {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<MediaStream> {
        self.log("capture:acquire".into());
        Ok(MediaStream {
            id: format!("lokal-{}", self.name),
            tracks: Vec::new(),
        })
    }

    async fn release(&self, _stream: MediaStream) {
        self.log("capture:release".into());
    }
}

#[async_trait]
impl MediaPeerFactory for Medien {
    async fn create_peer(
        &self,
        _config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn MediaPeer>> {
        Ok(Box::new(FakePeer {
            name: self.name.clone(),
            protokoll: self.protokoll.clone(),
            answer_sperre: self.answer_sperre.clone(),
            answer_erreicht: self.answer_erreicht.clone(),
            answer_fehler: self.answer_fehler,
            events,
        }))
    }
}

impl RemoteMediaSink for Medien {
    fn remote_stream(&self, peer: &EndpointId, _stream: MediaStream) {
        self.log(format!("sink:stream:{}", peer));
    }

    fn remote_stream_ended(&self, peer: &EndpointId) {
        self.log(format!("sink:ended:{}", peer));
    }
}

/// Media-Peer der bei jeder Description einen Candidate bzw. Track meldet
struct FakePeer {
    name: String,
    protokoll: Arc<Mutex<Vec<String>>>,
    answer_sperre: Option<Arc<Notify>>,
    answer_erreicht: Arc<Notify>,
    answer_fehler: bool,
    events: PeerEventSender,
}

impl FakePeer {
    fn log(&self, eintrag: String) {
        self.protokoll.lock().push(format!("peer:{}", eintrag));
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn add_local_stream(&mut self, stream: &MediaStream) -> Result<()> {
        self.log(format!("stream:{}", stream.id));
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::new(
            SdpType::Offer,
            format!("offer-{}", self.name),
        ))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.answer_erreicht.notify_one();
        if let Some(sperre) = &self.answer_sperre {
            sperre.notified().await;
        }
        if self.answer_fehler {
            return Err(CallbridgeError::NegotiationFailed(format!(
                "{}: keine Answer",
                self.name
            )));
        }
        Ok(SessionDescription::new(
            SdpType::Answer,
            format!("answer-{}", self.name),
        ))
    }

    async fn set_local_description(&mut self, _description: SessionDescription) -> Result<()> {
        self.log("local".into());
        self.events
            .local_candidate(IceCandidate::new(format!("kandidat-{}", self.name)));
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.log(format!("remote:{}", description.sdp));
        self.events.remote_track(MediaStream {
            id: "remote".into(),
            tracks: Vec::new(),
        });
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.log(format!("ice:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&mut self) {
        self.log("close".into());
    }
}

// ---------------------------------------------------------------------------
// Endpunkte
// ---------------------------------------------------------------------------

pub async fn endpunkt(relay: &Relay, medien: &Arc<Medien>) -> CallHandle {
    let verbindung = RelayConnection::connect(relay.adresse)
        .await
        .expect("Verbindung zum Relay fehlgeschlagen");
    CallEndpoint::starten(
        verbindung,
        CallConfig::default(),
        medien.clone(),
        medien.clone(),
        medien.clone(),
    )
}

pub async fn warte_auf_zustand(handle: &CallHandle, zustand: CallState) -> CallStatus {
    let mut rx = handle.state_changes();
    let status = tokio::time::timeout(TIMEOUT, rx.wait_for(|s| s.state == zustand))
        .await
        .unwrap_or_else(|_| panic!("Zustand {} nicht erreicht", zustand))
        .expect("Endpunkt-Task beendet")
        .clone();
    status
}
