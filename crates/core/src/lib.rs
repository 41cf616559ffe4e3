//! tunnelwerk-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Tunnelwerk-Crates gemeinsam genutzt werden. Fehler definieren
//! die Fachcrates selbst; hier leben nur die Id-Newtypes.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ConnId, RaumId, UserId, VlanId};
