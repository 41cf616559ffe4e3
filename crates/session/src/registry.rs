//! ConnectionRegistry – alle lebenden Verbindungen
//!
//! Injizierte Registry ohne globalen Zustand. Neben der Verbindungs-Map
//! fuehrt sie die Benutzer-Eindeutigkeit: pro Benutzer hoechstens eine
//! angemeldete Verbindung, ein zweiter Auth-Aufruf verdraengt die erste.

use dashmap::DashMap;
use std::sync::Arc;

use tunnelwerk_core::{ConnId, UserId};

use crate::connection::Connection;

/// Registry aller lebenden Verbindungen
#[derive(Default)]
pub struct ConnectionRegistry {
    verbindungen: DashMap<ConnId, Arc<Connection>>,
    benutzer: DashMap<UserId, ConnId>,
}

impl ConnectionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Nimmt eine frisch angenommene Verbindung auf
    pub fn registrieren(&self, conn: Arc<Connection>) {
        self.verbindungen.insert(conn.id(), conn);
    }

    /// Entfernt eine Verbindung nach dem Teardown
    pub fn entfernen(&self, conn_id: ConnId) {
        self.verbindungen.remove(&conn_id);
    }

    pub fn holen(&self, conn_id: ConnId) -> Option<Arc<Connection>> {
        self.verbindungen.get(&conn_id).map(|e| e.clone())
    }

    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    /// Beansprucht die Benutzer-Eindeutigkeit fuer eine Verbindung
    ///
    /// Gibt die bisher angemeldete Verbindung zurueck, falls der Benutzer
    /// schon woanders angemeldet war. Der Aufrufer trennt sie dann mit
    /// `DuplicateAuth`-Semantik.
    pub fn benutzer_beanspruchen(
        &self,
        user_id: UserId,
        conn_id: ConnId,
    ) -> Option<Arc<Connection>> {
        let vorher = self.benutzer.insert(user_id, conn_id);
        match vorher {
            Some(alte) if alte != conn_id => self.holen(alte),
            _ => None,
        }
    }

    /// Gibt die Benutzer-Eindeutigkeit frei, aber nur wenn sie noch dieser
    /// Verbindung gehoert
    pub fn benutzer_freigeben(&self, user_id: UserId, conn_id: ConnId) {
        self.benutzer
            .remove_if(&user_id, |_, eingetragen| *eingetragen == conn_id);
    }

    /// Verbindung eines angemeldeten Benutzers, falls vorhanden
    pub fn benutzer_verbindung(&self, user_id: UserId) -> Option<Arc<Connection>> {
        self.benutzer
            .get(&user_id)
            .and_then(|e| self.holen(*e.value()))
    }

    /// Trennt alle Verbindungen, z.B. beim Server-Shutdown
    pub fn alle_trennen(&self, grund: &str) {
        let alle: Vec<Arc<Connection>> =
            self.verbindungen.iter().map(|e| e.value().clone()).collect();
        for conn in alle {
            conn.trennen(grund);
        }
    }
}
