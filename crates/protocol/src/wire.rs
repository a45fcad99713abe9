//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).
//!
//! Ein Frame mit gueltiger Laenge aber kaputtem JSON beendet die Verbindung
//! nicht: der Decoder liefert `Some(Err(..))` und liest danach weiter.
//! Ein zu grosser Frame ist dagegen fatal.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::events::{ClientEvent, RelayEvent};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// `D` ist der Typ eingehender Events, `E` der Typ ausgehender Events.
/// Das Relay benutzt [`RelayCodec`], ein Endpunkt [`EndpointCodec`].
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use callbridge_protocol::wire::RelayCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, RelayCodec::new());
/// ```
pub struct FrameCodec<D, E> {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
    _typen: PhantomData<fn() -> (D, E)>,
}

/// Codec auf Relay-Seite: liest `ClientEvent`, schreibt `RelayEvent`
pub type RelayCodec = FrameCodec<ClientEvent, RelayEvent>;

/// Codec auf Endpunkt-Seite: liest `RelayEvent`, schreibt `ClientEvent`
pub type EndpointCodec = FrameCodec<RelayEvent, ClientEvent>;

impl<D, E> FrameCodec<D, E> {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _typen: PhantomData,
        }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl<D, E> Default for FrameCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E> Clone for FrameCodec<D, E> {
    fn clone(&self) -> Self {
        Self::with_max_size(self.max_frame_size)
    }
}

impl<D, E> std::fmt::Debug for FrameCodec<D, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl<D, E> Decoder for FrameCodec<D, E>
where
    D: DeserializeOwned,
{
    type Item = Result<D, ProtocolError>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(ProtocolError::FrameZuGross {
                laenge: length,
                maximum: self.max_frame_size,
            });
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        // Kaputtes JSON verwirft nur diesen Frame
        let event = serde_json::from_slice::<D>(&payload)
            .map_err(|e| ProtocolError::UngueltigesEvent(e.to_string()));

        Ok(Some(event))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl<D, E> Encoder<E> for FrameCodec<D, E>
where
    E: Serialize,
{
    type Error = ProtocolError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| ProtocolError::Serialisierung(e.to_string()))?;

        if json.len() > self.max_frame_size {
            return Err(ProtocolError::FrameZuGross {
                laenge: json.len(),
                maximum: self.max_frame_size,
            });
        }

        // Laengen-Feld + Payload schreiben
        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConnectedInfo;

    fn frame(json: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.put_slice(json);
        buf
    }

    #[test]
    fn relay_event_kodieren_und_beim_endpunkt_dekodieren() {
        let mut relay = RelayCodec::new();
        let mut endpunkt = EndpointCodec::new();

        let mut buf = BytesMut::new();
        relay
            .encode(
                RelayEvent::Connected(ConnectedInfo {
                    socket_id: "abc".into(),
                }),
                &mut buf,
            )
            .unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = endpunkt
            .decode(&mut buf)
            .unwrap()
            .expect("Muss einen Frame enthalten")
            .expect("Muss ein gueltiges Event sein");
        assert!(matches!(decoded, RelayEvent::Connected(ref c) if c.socket_id.as_str() == "abc"));
    }

    #[test]
    fn unvollstaendiger_frame() {
        let mut codec = EndpointCodec::new();
        let mut buf = BytesMut::new();
        RelayCodec::new().encode(RelayEvent::EndCall, &mut buf).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = RelayCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn zu_grosser_frame_ist_fatal() {
        let mut codec = RelayCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameZuGross { laenge: 200, maximum: 100 })
        ));
    }

    #[test]
    fn kaputtes_json_verwirft_nur_diesen_frame() {
        let mut codec = RelayCodec::new();
        let mut buf = frame(br#"{"event":"offer","data":{"to":"B"}}"#);
        buf.extend_from_slice(&frame(br#"{"event":"end-call"}"#));

        let erster = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert!(matches!(erster, Err(ProtocolError::UngueltigesEvent(_))));

        let zweiter = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(zweiter.unwrap(), ClientEvent::EndCall);
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_lehnt_zu_grosse_nachricht_ab() {
        let mut codec = RelayCodec::with_max_size(5);
        let mut buf = BytesMut::new();
        assert!(codec.encode(RelayEvent::EndCall, &mut buf).is_err());
    }

    #[test]
    fn mehrere_events_im_buffer() {
        let mut codec = RelayCodec::new();
        let mut buf = BytesMut::new();
        for _ in 0..3 {
            buf.extend_from_slice(&frame(br#"{"event":"end-call"}"#));
        }
        for _ in 0..3 {
            let event = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
            assert_eq!(event.unwrap(), ClientEvent::EndCall);
        }
        assert!(buf.is_empty());
    }
}
