//! tunnelwerk-rooms – fluechtige Mehrparteien-Raeume
//!
//! Raeume koppeln Mitgliedschaft an Tunnel-Peers: Beitritt legt einen
//! Peer mit VLAN-Suffix an, Austritt baut ihn ab. Pro Raum gibt es genau
//! einen Besitzer, solange er Mitglieder hat; faellt der Besitzer weg,
//! rueckt das am laengsten anwesende Mitglied nach.

pub mod error;
pub mod raum;
pub mod verwaltung;

// Bequeme Re-Exporte
pub use error::{RaumError, RaumResult};
pub use raum::{MitgliedInfo, Raum, RaumInfo, RaumKonfig, RaumZustand};
pub use verwaltung::{RaumVerwaltung, IDLE_FRIST};
