//! tunnelwerk-pubsub – benannte Broadcast-Kanaele
//!
//! Publisher verteilen Push-Nachrichten (`publish.<name>`) an ihre
//! Abonnenten, wahlweise von Hand oder ueber einen Zeitplan-Treiber
//! (festes Intervall oder Cron-Ausdruck).

pub mod error;
pub mod publisher;
pub mod registry;

// Bequeme Re-Exporte
pub use error::{PubSubError, PubSubResult};
pub use publisher::{Generator, Publisher, Zeitplan};
pub use registry::PublisherRegistry;
