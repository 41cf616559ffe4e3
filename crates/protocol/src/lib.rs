//! tunnelwerk-protocol – Wire-Format und Nachrichtentypen
//!
//! Dieses Crate definiert das Rahmenformat der persistenten Verbindung,
//! die JSON-Nachrichten (Request/Response) und die Statuscodes.
//!
//! ## Schichten
//!
//! ```text
//! Frame (Typ-Byte + Laenge + Payload)   – wire.rs
//!     |
//!     +-- Data  -> Request / Response (JSON)  – message.rs
//!     +-- Ping / Pong (1 Byte)                – Heartbeat
//!     +-- Close                               – Teardown-Ausloeser
//! ```

pub mod message;
pub mod status;
pub mod wire;

// Bequeme Re-Exporte
pub use message::{PublishEnvelope, Request, Response};
pub use status::StatusCode;
pub use wire::{Frame, FrameCodec, DEFAULT_MAX_FRAME_SIZE};
