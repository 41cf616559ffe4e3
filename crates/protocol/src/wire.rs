//! Wire-Format der persistenten Verbindung
//!
//! Frame-basiertes Protokoll: Typ(u8) + Laenge(u32 big-endian) + Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+----...----+
//! | Typ    | Laenge (u32 BE)                   | Payload   |
//! +--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Frame-Typen: `Data` (JSON), `Ping`/`Pong` (1 Byte Payload), `Close`
//! (leer). Die Laenge zaehlt nur die Payload-Bytes. Maximale Frame-Groesse
//! ist konfigurierbar (Standard: 1 MB).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Headers: Typ-Byte + Laengen-Feld
pub const HEADER_SIZE: usize = 1 + 4;

const TYP_DATA: u8 = 0;
const TYP_PING: u8 = 1;
const TYP_PONG: u8 = 2;
const TYP_CLOSE: u8 = 3;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein Frame auf der persistenten Verbindung
///
/// Kontroll-Frames (`Ping`, `Pong`, `Close`) steuern Heartbeat und
/// Teardown; `Data` transportiert JSON-Nachrichten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON-Payload (Request oder Response)
    Data(Bytes),
    /// Heartbeat-Anfrage mit opakem Byte
    Ping(u8),
    /// Heartbeat-Antwort mit opakem Byte
    Pong(u8),
    /// Verbindungsabbau
    Close,
}

impl Frame {
    /// Serialisiert einen Wert als Data-Frame
    pub fn data_json<T: Serialize>(wert: &T) -> io::Result<Self> {
        let json = serde_json::to_vec(wert).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;
        Ok(Self::Data(Bytes::from(json)))
    }

    fn typ_byte(&self) -> u8 {
        match self {
            Self::Data(_) => TYP_DATA,
            Self::Ping(_) => TYP_PING,
            Self::Pong(_) => TYP_PONG,
            Self::Close => TYP_CLOSE,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die persistente Verbindung
///
/// Implementiert `Encoder<Frame>` und `Decoder` fuer nahtlose Integration
/// mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen Header
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let typ = src[0];
        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        let frame = match typ {
            TYP_DATA => Frame::Data(payload),
            TYP_PING => Frame::Ping(payload.first().copied().unwrap_or(0)),
            TYP_PONG => Frame::Pong(payload.first().copied().unwrap_or(0)),
            TYP_CLOSE => Frame::Close,
            sonst => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unbekannter Frame-Typ: {}", sonst),
                ));
            }
        };

        Ok(Some(frame))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload: &[u8] = match &item {
            Frame::Data(bytes) => bytes,
            Frame::Ping(b) | Frame::Pong(b) => std::slice::from_ref(b),
            Frame::Close => &[],
        };

        if payload.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    payload.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u8(item.typ_byte());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
