//! tunnelwerk-session – Verbindungszustand und Dispatch-Engine
//!
//! Dieses Crate traegt die persistente Verbindung: den geteilten
//! Verbindungszustand (`Connection`), die Registry aller lebenden
//! Verbindungen, den unveraenderlichen Router samt Gruppen-Middleware,
//! die Dispatch-Engine mit Zeitlimit und Panic-Eindaemmung sowie den
//! TCP-Verbindungs-Task.
//!
//! ## Ablauf einer Anfrage
//!
//! ```text
//! TCP -> FrameCodec -> Lese-Schleife -> Eingangs-Queue
//!     -> Dispatch-Schleife -> Handler-Kette (Router)
//!     -> Ausgangs-Queue -> Writer -> TCP
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod router;
pub mod tcp;

// Bequeme Re-Exporte
pub use connection::{AbbauHook, Connection, VerbindungsKanaele};
pub use dispatch::{DispatchEngine, RequestKontext};
pub use error::{SessionError, SessionResult};
pub use registry::ConnectionRegistry;
pub use router::{handler, Gruppe, Handler, Router, RouterBuilder};
pub use tcp::{VerbindungsEinstellungen, VerbindungsTreiber};
