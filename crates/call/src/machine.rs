//! Call-State-Machine eines Endpunkts
//!
//! Pro Endpunkt existiert genau eine Maschine. Sie gehoert dem
//! Endpunkt-Task (siehe [`crate::endpoint`]) und wird nie geteilt.
//!
//! ## Zustaende
//!
//! ```text
//!            start_call                 receive_answer
//!   Idle ----------------> AwaitingAnswer ------------> Active
//!     |                                                   ^
//!     | receive_offer                                     |
//!     +------------------> AwaitingOffer -----------------+
//!                                     (Answer gesendet)
//!
//!   AwaitingAnswer | AwaitingOffer | Active --end_call--> Ending --> Idle
//! ```
//!
//! `Ending` ist nur waehrend des Abbaus gesetzt: erst wird das
//! Negotiation-Objekt geschlossen, dann die lokalen Medien freigegeben.

use callbridge_core::{CallbridgeError, EndpointId, Result, SessionId};
use callbridge_protocol::events::{AnswerRequest, OfferRequest};
use callbridge_protocol::{ClientEvent, IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::{
    MediaCapture, MediaConstraints, MediaPeer, MediaPeerFactory, MediaStream, PeerConfig,
    PeerEvent, PeerEventSender, RemoteMediaSink,
};
use crate::transport::SignalTransport;

// ---------------------------------------------------------------------------
// Zustand und Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Offer gesendet, warte auf Answer
    AwaitingAnswer,
    /// Offer empfangen, Answer wird erstellt
    AwaitingOffer,
    Active,
    /// Abbau laeuft (nur intern sichtbar)
    Ending,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingAnswer => "awaiting-answer",
            Self::AwaitingOffer => "awaiting-offer",
            Self::Active => "active",
            Self::Ending => "ending",
        };
        f.write_str(s)
    }
}

/// Umgang mit entfernten ICE-Candidates vor der Remote-Description
///
/// Candidates ohne laufenden Call werden immer verworfen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyCandidates {
    /// Zwischenspeichern und nach `set_remote_description` anwenden
    #[default]
    Buffer,
    /// Verwerfen
    Drop,
}

#[derive(Debug, Clone, Default)]
pub struct CallConfig {
    pub peer: PeerConfig,
    pub constraints: MediaConstraints,
    pub early_candidates: EarlyCandidates,
}

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rolle {
    Anrufer,
    Angerufener,
}

/// Alles was zu einem laufenden Call-Versuch gehoert
struct CallContext {
    peer_id: EndpointId,
    session_id: SessionId,
    rolle: Rolle,
    generation: u64,
    media_peer: Option<Box<dyn MediaPeer>>,
    local_stream: Option<MediaStream>,
    /// Lokale Candidates bevor Offer/Answer gesendet wurde
    lokale_candidates: Vec<IceCandidate>,
    beschreibung_gesendet: bool,
    remote_gesetzt: bool,
    /// Entfernte Candidates vor `set_remote_description`
    remote_candidates: Vec<IceCandidate>,
    remote_stream_aktiv: bool,
}

impl CallContext {
    fn neu(peer_id: EndpointId, session_id: SessionId, rolle: Rolle, generation: u64) -> Self {
        Self {
            peer_id,
            session_id,
            rolle,
            generation,
            media_peer: None,
            local_stream: None,
            lokale_candidates: Vec::new(),
            beschreibung_gesendet: false,
            remote_gesetzt: false,
            remote_candidates: Vec::new(),
            remote_stream_aktiv: false,
        }
    }

    fn peer(&mut self) -> Result<&mut Box<dyn MediaPeer>> {
        self.media_peer
            .as_mut()
            .ok_or_else(|| CallbridgeError::NegotiationFailed("kein Negotiation-Objekt".into()))
    }
}

// ---------------------------------------------------------------------------
// CallMachine
// ---------------------------------------------------------------------------

/// Zustandsmaschine fuer einen Endpunkt
pub struct CallMachine {
    config: CallConfig,
    transport: Arc<dyn SignalTransport>,
    capture: Arc<dyn MediaCapture>,
    peers: Arc<dyn MediaPeerFactory>,
    sink: Arc<dyn RemoteMediaSink>,
    peer_events: mpsc::UnboundedSender<(u64, PeerEvent)>,
    state: CallState,
    call: Option<CallContext>,
    naechste_generation: u64,
}

impl CallMachine {
    pub fn neu(
        config: CallConfig,
        transport: Arc<dyn SignalTransport>,
        capture: Arc<dyn MediaCapture>,
        peers: Arc<dyn MediaPeerFactory>,
        sink: Arc<dyn RemoteMediaSink>,
        peer_events: mpsc::UnboundedSender<(u64, PeerEvent)>,
    ) -> Self {
        Self {
            config,
            transport,
            capture,
            peers,
            sink,
            peer_events,
            state: CallState::Idle,
            call: None,
            naechste_generation: 0,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.call.as_ref().map(|c| &c.session_id)
    }

    /// Gegenueber des laufenden Calls
    pub fn peer_id(&self) -> Option<&EndpointId> {
        self.call.as_ref().map(|c| &c.peer_id)
    }

    pub fn socket_id(&self) -> &EndpointId {
        self.transport.socket_id()
    }

    fn naechste_generation(&mut self) -> u64 {
        self.naechste_generation += 1;
        self.naechste_generation
    }

    // -----------------------------------------------------------------------
    // Anrufer
    // -----------------------------------------------------------------------

    /// Ruft `target` an
    ///
    /// Ein laufender Call wird vorher beendet. Schlaegt der Medienzugriff
    /// fehl, bleibt der Zustand `Idle` und der Fehler ist `MediaUnavailable`.
    pub async fn start_call(&mut self, target: EndpointId) -> Result<()> {
        let eigene_id = self.transport.socket_id().clone();
        if target == eigene_id {
            return Err(CallbridgeError::NegotiationFailed(
                "Anruf an sich selbst".into(),
            ));
        }
        if self.call.is_some() {
            tracing::info!(peer = ?self.peer_id(), "Laufender Call wird fuer neuen Anruf beendet");
            self.end_call().await;
        }

        let generation = self.naechste_generation();
        self.call = Some(CallContext::neu(
            target.clone(),
            SessionId::fuer_initiator(&eigene_id),
            Rolle::Anrufer,
            generation,
        ));

        if let Err(e) = self.offer_senden(&eigene_id, &target).await {
            tracing::warn!(peer = %target, fehler = %e, "Anruf fehlgeschlagen");
            self.abbauen(false).await;
            return Err(e);
        }

        self.state = CallState::AwaitingAnswer;
        tracing::info!(peer = %target, "Offer gesendet, warte auf Answer");
        Ok(())
    }

    async fn offer_senden(&mut self, eigene_id: &EndpointId, target: &EndpointId) -> Result<()> {
        let stream = self
            .capture
            .acquire(&self.config.constraints)
            .await
            .map_err(als_media_fehler)?;

        let ctx = self.call.as_mut().ok_or_else(kein_call)?;
        ctx.local_stream = Some(stream.clone());

        let events = PeerEventSender::neu(ctx.generation, self.peer_events.clone());
        let peer = self
            .peers
            .create_peer(&self.config.peer, events)
            .await
            .map_err(als_negotiation_fehler)?;
        let peer = ctx.media_peer.insert(peer);

        peer.add_local_stream(&stream)
            .await
            .map_err(als_negotiation_fehler)?;
        let offer = peer.create_offer().await.map_err(als_negotiation_fehler)?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(als_negotiation_fehler)?;

        self.transport
            .send(ClientEvent::Offer(OfferRequest {
                from: eigene_id.clone(),
                to: target.clone(),
                offer,
            }))
            .await?;

        self.lokale_candidates_senden().await;
        Ok(())
    }

    /// Wendet die Answer des Angerufenen an
    ///
    /// Ohne ausstehendes Offer an `from` wird die Answer verworfen und der
    /// Zustand bleibt unveraendert.
    pub async fn receive_answer(
        &mut self,
        from: EndpointId,
        answer: SessionDescription,
    ) -> Result<()> {
        let erwartet = self.state == CallState::AwaitingAnswer
            && self.call.as_ref().is_some_and(|c| c.peer_id == from);
        if !erwartet {
            tracing::warn!(peer = %from, zustand = %self.state, "Answer ohne ausstehendes Offer verworfen");
            return Err(CallbridgeError::NegotiationFailed(format!(
                "keine ausstehende Negotiation mit {}",
                from
            )));
        }

        if let Err(e) = self.remote_setzen(answer).await {
            tracing::warn!(peer = %from, fehler = %e, "Answer konnte nicht angewendet werden");
            self.abbauen(true).await;
            return Err(e);
        }

        self.state = CallState::Active;
        tracing::info!(peer = %from, "Call aktiv");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Angerufener
    // -----------------------------------------------------------------------

    /// Beantwortet ein eingehendes Offer
    ///
    /// Das letzte Offer gewinnt: ein laufender Versuch wird ohne
    /// Benachrichtigung verworfen. Ohne lokale Medien wird nur empfangen.
    /// Ein Offer des Gegenuebers im aktiven Call ist eine Renegotiation und
    /// wird auf dem bestehenden Negotiation-Objekt beantwortet.
    pub async fn receive_offer(
        &mut self,
        from: EndpointId,
        offer: SessionDescription,
    ) -> Result<()> {
        let renegotiation = self.state == CallState::Active
            && self
                .call
                .as_ref()
                .is_some_and(|c| c.peer_id == from && c.media_peer.is_some());
        if renegotiation {
            tracing::info!(peer = %from, "Renegotiation durch Gegenueber");
            if let Err(e) = self.answer_erzeugen(&from, offer).await {
                tracing::warn!(peer = %from, fehler = %e, "Renegotiation fehlgeschlagen");
                self.abbauen(true).await;
                return Err(e);
            }
            return Ok(());
        }

        if self.call.is_some() {
            tracing::info!(
                vorher = ?self.peer_id(),
                neu = %from,
                zustand = %self.state,
                "Neues Offer ersetzt laufenden Call"
            );
            self.abbauen(false).await;
        }

        let generation = self.naechste_generation();
        self.call = Some(CallContext::neu(
            from.clone(),
            SessionId::fuer_initiator(&from),
            Rolle::Angerufener,
            generation,
        ));
        self.state = CallState::AwaitingOffer;

        if let Err(e) = self.answer_senden(&from, offer).await {
            tracing::warn!(peer = %from, fehler = %e, "Answer konnte nicht erstellt werden");
            // end-call lehnt das Offer beim Relay ab, der Anrufer kehrt nach Idle zurueck
            self.abbauen(true).await;
            return Err(e);
        }

        self.state = CallState::Active;
        tracing::info!(peer = %from, "Answer gesendet, Call aktiv");
        Ok(())
    }

    async fn answer_senden(&mut self, from: &EndpointId, offer: SessionDescription) -> Result<()> {
        let stream = match self.capture.acquire(&self.config.constraints).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(peer = %from, fehler = %e, "Keine lokalen Medien, nur Empfang");
                None
            }
        };

        let ctx = self.call.as_mut().ok_or_else(kein_call)?;
        ctx.local_stream = stream.clone();

        let events = PeerEventSender::neu(ctx.generation, self.peer_events.clone());
        let peer = self
            .peers
            .create_peer(&self.config.peer, events)
            .await
            .map_err(als_negotiation_fehler)?;
        let peer = ctx.media_peer.insert(peer);
        if let Some(stream) = &stream {
            peer.add_local_stream(stream)
                .await
                .map_err(als_negotiation_fehler)?;
        }

        self.answer_erzeugen(from, offer).await
    }

    /// Setzt das Offer, erzeugt die Answer und sendet sie an `from`
    async fn answer_erzeugen(&mut self, from: &EndpointId, offer: SessionDescription) -> Result<()> {
        self.remote_setzen(offer).await?;

        let ctx = self.call.as_mut().ok_or_else(kein_call)?;
        let peer = ctx.peer()?;
        let answer = peer.create_answer().await.map_err(als_negotiation_fehler)?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(als_negotiation_fehler)?;

        self.transport
            .send(ClientEvent::Answer(AnswerRequest {
                to_socket_id: from.clone(),
                answer,
            }))
            .await?;

        self.lokale_candidates_senden().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Candidates und Tracks
    // -----------------------------------------------------------------------

    /// Setzt die entfernte Description und wendet gepufferte Candidates an
    async fn remote_setzen(&mut self, description: SessionDescription) -> Result<()> {
        let ctx = self.call.as_mut().ok_or_else(kein_call)?;
        ctx.peer()?
            .set_remote_description(description)
            .await
            .map_err(als_negotiation_fehler)?;
        ctx.remote_gesetzt = true;

        let gepuffert = std::mem::take(&mut ctx.remote_candidates);
        let peer = ctx.peer()?;
        for candidate in gepuffert {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                tracing::warn!(fehler = %e, "Gepufferter Candidate abgelehnt");
            }
        }
        Ok(())
    }

    /// Entfernter ICE-Candidate vom Relay
    pub async fn receive_ice_candidate(&mut self, candidate: IceCandidate) {
        let puffern = self.config.early_candidates == EarlyCandidates::Buffer;

        // Das Relay stellt das Offer vor den Candidates zu. Ohne Call
        // stammt ein Candidate aus einem bereits beendeten Call.
        let Some(ctx) = self.call.as_mut() else {
            tracing::debug!("Candidate ohne Call verworfen");
            return;
        };

        if !ctx.remote_gesetzt {
            if puffern {
                tracing::trace!(peer = %ctx.peer_id, "Candidate vor Remote-Description gepuffert");
                ctx.remote_candidates.push(candidate);
            } else {
                tracing::debug!(peer = %ctx.peer_id, "Candidate vor Remote-Description verworfen");
            }
            return;
        }

        let peer_id = ctx.peer_id.clone();
        match ctx.peer() {
            Ok(peer) => {
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    tracing::warn!(peer = %peer_id, fehler = %e, "Candidate abgelehnt");
                }
            }
            Err(e) => tracing::debug!(peer = %peer_id, fehler = %e, "Candidate verworfen"),
        }
    }

    /// Lokaler Candidate vom Media-Peer der Generation `generation`
    pub async fn local_ice_candidate(&mut self, generation: u64, candidate: IceCandidate) {
        let Some(ctx) = self.call.as_mut().filter(|c| c.generation == generation) else {
            tracing::trace!(generation, "Candidate eines alten Negotiation-Objekts verworfen");
            return;
        };

        if !ctx.beschreibung_gesendet {
            ctx.lokale_candidates.push(candidate);
            return;
        }
        if let Err(e) = self.transport.send(ClientEvent::IceCandidate(candidate)).await {
            tracing::warn!(fehler = %e, "Candidate konnte nicht gesendet werden");
        }
    }

    /// Entfernter Medienstrom vom Media-Peer der Generation `generation`
    pub fn remote_track(&mut self, generation: u64, stream: MediaStream) {
        let Some(ctx) = self.call.as_mut().filter(|c| c.generation == generation) else {
            tracing::trace!(generation, "Track eines alten Negotiation-Objekts verworfen");
            return;
        };
        ctx.remote_stream_aktiv = true;
        self.sink.remote_stream(&ctx.peer_id, stream);
    }

    /// Sendet die gepufferten lokalen Candidates nach Offer bzw. Answer
    async fn lokale_candidates_senden(&mut self) {
        let Some(ctx) = self.call.as_mut() else {
            return;
        };
        ctx.beschreibung_gesendet = true;
        let gepuffert = std::mem::take(&mut ctx.lokale_candidates);
        for candidate in gepuffert {
            if let Err(e) = self.transport.send(ClientEvent::IceCandidate(candidate)).await {
                tracing::warn!(fehler = %e, "Gepufferter Candidate nicht gesendet");
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Beenden
    // -----------------------------------------------------------------------

    /// Lokales Auflegen
    ///
    /// Das Gegenueber wird benachrichtigt sobald es vom Call weiss: nach
    /// gesendetem Offer, oder immer als Angerufener (Ablehnen).
    pub async fn end_call(&mut self) {
        let benachrichtigen = match &self.call {
            Some(ctx) => ctx.beschreibung_gesendet || ctx.rolle == Rolle::Angerufener,
            None => {
                tracing::debug!("Auflegen ohne laufenden Call");
                return;
            }
        };
        self.abbauen(benachrichtigen).await;
    }

    /// `end-call` vom Relay (Gegenueber hat aufgelegt oder ist getrennt)
    pub async fn remote_end_call(&mut self) {
        match self.peer_id() {
            Some(peer) => tracing::info!(peer = %peer, "Gegenueber hat aufgelegt"),
            None => {
                tracing::debug!("end-call ohne laufenden Call");
                return;
            }
        }
        self.abbauen(false).await;
    }

    /// Raeumt nach einem abgebrochenen Schritt auf
    pub async fn abort(&mut self) {
        if self.call.is_some() {
            tracing::debug!(peer = ?self.peer_id(), zustand = %self.state, "Schritt abgebrochen");
        }
        self.abbauen(false).await;
    }

    async fn abbauen(&mut self, benachrichtigen: bool) {
        self.state = CallState::Ending;

        if let Some(mut ctx) = self.call.take() {
            if let Some(mut peer) = ctx.media_peer.take() {
                peer.close().await;
            }
            if ctx.remote_stream_aktiv {
                self.sink.remote_stream_ended(&ctx.peer_id);
            }
            if benachrichtigen {
                if let Err(e) = self.transport.send(ClientEvent::EndCall).await {
                    tracing::warn!(peer = %ctx.peer_id, fehler = %e, "end-call nicht gesendet");
                }
            }
            if let Some(stream) = ctx.local_stream.take() {
                self.capture.release(stream).await;
            }
            tracing::debug!(peer = %ctx.peer_id, session = %ctx.session_id, "Call abgebaut");
        }

        self.state = CallState::Idle;
    }
}

fn kein_call() -> CallbridgeError {
    CallbridgeError::NegotiationFailed("kein laufender Call".into())
}

fn als_media_fehler(e: CallbridgeError) -> CallbridgeError {
    match e {
        CallbridgeError::MediaUnavailable(_) => e,
        andere => CallbridgeError::MediaUnavailable(andere.to_string()),
    }
}

fn als_negotiation_fehler(e: CallbridgeError) -> CallbridgeError {
    match e {
        CallbridgeError::NegotiationFailed(_) => e,
        andere => CallbridgeError::NegotiationFailed(andere.to_string()),
    }
}
