//! Geteilter Server-Zustand
//!
//! Buendelt die injizierten Registries und Kollaboratoren. Es gibt keine
//! globalen Maps; alles haengt an diesem Objekt und wird beim Start
//! einmal verdrahtet.

use serde_json::json;
use std::sync::Arc;

use tunnelwerk_auth::{BerechtigungsQuelle, SperrListe, TokenPruefer};
use tunnelwerk_pubsub::PublisherRegistry;
use tunnelwerk_rooms::RaumVerwaltung;
use tunnelwerk_session::ConnectionRegistry;
use tunnelwerk_tunnel::TunnelAdapter;

use crate::config::ServerConfig;

/// Haelt alle langlebigen Komponenten des Servers zusammen
pub struct ServerState {
    pub config: ServerConfig,
    pub verbindungen: Arc<ConnectionRegistry>,
    pub publisher: Arc<PublisherRegistry>,
    pub raeume: Arc<RaumVerwaltung>,
    pub tunnel: Arc<TunnelAdapter>,
    pub token_pruefer: Arc<dyn TokenPruefer>,
    pub sperrliste: Arc<dyn SperrListe>,
    pub berechtigungen: Arc<dyn BerechtigungsQuelle>,
}

impl ServerState {
    /// Minimale Status-Auskunft: Live-Zaehler und Raumliste
    pub fn status(&self, seite: usize, groesse: usize) -> serde_json::Value {
        json!({
            "verbindungen": self.verbindungen.anzahl(),
            "publisher": self.publisher.anzahl(),
            "raeume": self.raeume.anzahl(),
            "tunnelPeers": self.tunnel.peer_anzahl(),
            "raumListe": self.raeume.liste(seite, groesse),
        })
    }
}
