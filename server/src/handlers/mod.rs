//! Controller-Schicht – registriert alle RPC-Methoden am Router
//!
//! Namensraeume:
//! - `system.*` – Ping, Zeit, Auth, Verbindungs- und Schluessel-Auskunft
//! - `kanal.*`  – benannte Broadcast-Kanaele (nur angemeldet)
//! - `raum.*`   – Raum-Lebenszyklus (nur angemeldet)

pub mod kanal;
pub mod middleware;
pub mod raum;
pub mod system;

use std::sync::Arc;

use tunnelwerk_session::{Router, RouterBuilder, SessionResult};

use crate::state::ServerState;

/// Baut den vollstaendigen Router; doppelte Methoden sind ein Startfehler
pub fn router_bauen(state: &Arc<ServerState>) -> SessionResult<Router> {
    let mut builder = RouterBuilder::neu();
    system::registrieren(&mut builder, Arc::clone(state));
    kanal::registrieren(&mut builder, Arc::clone(state));
    raum::registrieren(&mut builder, Arc::clone(state));
    builder.bauen()
}
