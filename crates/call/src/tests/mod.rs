//! Test-Doubles fuer Transport und Medien


use async_trait::async_trait;
use callbridge_core::{CallbridgeError, EndpointId, Result};
use callbridge_protocol::{ClientEvent, IceCandidate, SdpType, SessionDescription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::machine::{CallConfig, CallMachine};
use crate::media::{
    MediaCapture, MediaConstraints, MediaPeer, MediaPeerFactory, MediaStream, MediaTrack,
    PeerConfig, PeerEvent, PeerEventSender, RemoteMediaSink, TrackKind,
};
use crate::transport::SignalTransport;

/// Gemeinsames Protokoll aller Fakes, in Aufrufreihenfolge
pub(crate) type Protokoll = Arc<Mutex<Vec<String>>>;

pub(crate) struct FakeTransport {
    id: EndpointId,
    gesendet: Mutex<Vec<ClientEvent>>,
    protokoll: Protokoll,
}

#[async_trait]
impl SignalTransport for FakeTransport {
    async fn send(&self, event: ClientEvent) -> Result<()> {
        self.protokoll.lock().push(format!("send:{}", event.name()));
        self.gesendet.lock().push(event);
        Ok(())
    }

    fn socket_id(&self) -> &EndpointId {
        &self.id
    }
}

pub(crate) struct FakeCapture {
    pub verfuegbar: AtomicBool,
    protokoll: Protokoll,
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<MediaStream> {
        if !self.verfuegbar.load(Ordering::SeqCst) {
            return Err(CallbridgeError::MediaUnavailable("keine Kamera".into()));
        }
        self.protokoll.lock().push("capture:acquire".into());
        Ok(MediaStream {
            id: "lokal".into(),
            tracks: vec![
                MediaTrack {
                    id: "mic".into(),
                    kind: TrackKind::Audio,
                },
                MediaTrack {
                    id: "cam".into(),
                    kind: TrackKind::Video,
                },
            ],
        })
    }

    async fn release(&self, _stream: MediaStream) {
        self.protokoll.lock().push("capture:release".into());
    }
}

pub(crate) struct FakePeerFactory {
    pub answer_schlaegt_fehl: Arc<AtomicBool>,
    pub remote_schlaegt_fehl: Arc<AtomicBool>,
    erstellt: AtomicUsize,
    pub sender: Mutex<Vec<PeerEventSender>>,
    protokoll: Protokoll,
}

#[async_trait]
impl MediaPeerFactory for FakePeerFactory {
    async fn create_peer(
        &self,
        _config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn MediaPeer>> {
        let nr = self.erstellt.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender.lock().push(events);
        self.protokoll.lock().push(format!("peer{}:neu", nr));
        Ok(Box::new(FakePeer {
            nr,
            answer_schlaegt_fehl: self.answer_schlaegt_fehl.clone(),
            remote_schlaegt_fehl: self.remote_schlaegt_fehl.clone(),
            protokoll: self.protokoll.clone(),
        }))
    }
}

struct FakePeer {
    nr: usize,
    answer_schlaegt_fehl: Arc<AtomicBool>,
    remote_schlaegt_fehl: Arc<AtomicBool>,
    protokoll: Protokoll,
}

impl FakePeer {
    fn log(&self, was: &str) {
        self.protokoll.lock().push(format!("peer{}:{}", self.nr, was));
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn add_local_stream(&mut self, _stream: &MediaStream) -> Result<()> {
        self.log("stream");
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::new(SdpType::Offer, format!("offer-{}", self.nr)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        if self.answer_schlaegt_fehl.load(Ordering::SeqCst) {
            return Err(CallbridgeError::NegotiationFailed("answer".into()));
        }
        Ok(SessionDescription::new(SdpType::Answer, format!("answer-{}", self.nr)))
    }

    async fn set_local_description(&mut self, _description: SessionDescription) -> Result<()> {
        self.log("local");
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.remote_schlaegt_fehl.load(Ordering::SeqCst) {
            return Err(CallbridgeError::NegotiationFailed("remote".into()));
        }
        self.log(&format!("remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.log(&format!("ice:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&mut self) {
        self.log("close");
    }
}

pub(crate) struct FakeSink {
    protokoll: Protokoll,
}

impl RemoteMediaSink for FakeSink {
    fn remote_stream(&self, peer: &EndpointId, _stream: MediaStream) {
        self.protokoll.lock().push(format!("sink:stream:{}", peer));
    }

    fn remote_stream_ended(&self, peer: &EndpointId) {
        self.protokoll.lock().push(format!("sink:ended:{}", peer));
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

pub(crate) struct Umgebung {
    pub machine: CallMachine,
    pub transport: Arc<FakeTransport>,
    pub capture: Arc<FakeCapture>,
    pub peers: Arc<FakePeerFactory>,
    pub protokoll: Protokoll,
    pub _peer_rx: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
}

impl Umgebung {
    pub fn gesendet(&self) -> Vec<ClientEvent> {
        self.transport.gesendet.lock().clone()
    }

    pub fn protokoll(&self) -> Vec<String> {
        self.protokoll.lock().clone()
    }

    pub fn protokoll_leeren(&self) {
        self.protokoll.lock().clear();
        self.transport.gesendet.lock().clear();
    }

    /// Generation des zuletzt erzeugten Media-Peers
    pub fn letzte_generation(&self) -> u64 {
        self.peers
            .sender
            .lock()
            .last()
            .map(|s| s.generation())
            .expect("kein Media-Peer erzeugt")
    }
}

pub(crate) fn umgebung(id: &str) -> Umgebung {
    umgebung_mit(id, CallConfig::default())
}

pub(crate) fn umgebung_mit(id: &str, config: CallConfig) -> Umgebung {
    let protokoll: Protokoll = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(FakeTransport {
        id: id.into(),
        gesendet: Mutex::new(Vec::new()),
        protokoll: protokoll.clone(),
    });
    let capture = Arc::new(FakeCapture {
        verfuegbar: AtomicBool::new(true),
        protokoll: protokoll.clone(),
    });
    let peers = Arc::new(FakePeerFactory {
        answer_schlaegt_fehl: Arc::new(AtomicBool::new(false)),
        remote_schlaegt_fehl: Arc::new(AtomicBool::new(false)),
        erstellt: AtomicUsize::new(0),
        sender: Mutex::new(Vec::new()),
        protokoll: protokoll.clone(),
    });
    let sink = Arc::new(FakeSink {
        protokoll: protokoll.clone(),
    });
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();

    let machine = CallMachine::neu(
        config,
        transport.clone(),
        capture.clone(),
        peers.clone(),
        sink,
        peer_tx,
    );

    Umgebung {
        machine,
        transport,
        capture,
        peers,
        protokoll,
        _peer_rx: peer_rx,
    }
}

pub(crate) fn offer(sdp: &str) -> SessionDescription {
    SessionDescription::new(SdpType::Offer, sdp)
}

pub(crate) fn answer(sdp: &str) -> SessionDescription {
    SessionDescription::new(SdpType::Answer, sdp)
}
