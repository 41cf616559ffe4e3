//! RaumVerwaltung – Registry aller Raeume samt Beitritts-Token-Index
//!
//! Die Verwaltung besitzt die Raum-Registry, installiert die Abbau-Hooks
//! an den Mitglieds-Verbindungen und traegt leere oder geschlossene
//! Raeume wieder aus. Die Raumliste wird in Einfuegereihenfolge
//! seitenweise ausgegeben.

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tunnelwerk_core::{ConnId, RaumId};
use tunnelwerk_session::Connection;
use tunnelwerk_tunnel::TunnelAdapter;

use crate::error::{RaumError, RaumResult};
use crate::raum::{MitgliedInfo, Raum, RaumInfo, RaumKonfig};

/// Laenge des Beitritts-Tokens
const TOKEN_LAENGE: usize = 32;

/// Standard-Frist fuer die automatische Schliessung untaetiger Raeume
pub const IDLE_FRIST: Duration = Duration::from_secs(30 * 60);

/// Registry und Lebenszyklus aller Raeume
pub struct RaumVerwaltung {
    raeume: DashMap<RaumId, Arc<Raum>>,
    token_index: DashMap<String, RaumId>,
    /// Einfuegereihenfolge fuer die seitenweise Liste
    reihenfolge: Mutex<Vec<RaumId>>,
    adapter: Arc<TunnelAdapter>,
    idle_frist: Duration,
}

impl RaumVerwaltung {
    pub fn neu(adapter: Arc<TunnelAdapter>, idle_frist: Duration) -> Arc<Self> {
        Arc::new(Self {
            raeume: DashMap::new(),
            token_index: DashMap::new(),
            reihenfolge: Mutex::new(Vec::new()),
            adapter,
            idle_frist,
        })
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Erstellt einen Raum und nimmt den Besitzer als erstes Mitglied auf
    ///
    /// Schlaegt der Tunnel-Peer des Besitzers fehl, wird kein Raum
    /// registriert. Das Beitritts-Token ist nicht erratbar und der einzige
    /// Weg in den Raum.
    pub async fn neuer_raum(
        self: &Arc<Self>,
        besitzer: Arc<Connection>,
        konfig: RaumKonfig,
        schluessel: &str,
        lokaler_port: u16,
    ) -> RaumResult<(Arc<Raum>, Vec<MitgliedInfo>)> {
        let id = RaumId::new();
        let token = beitritts_token_erzeugen();
        let raum = Raum::neu(id, token.clone(), konfig, Arc::clone(&self.adapter));

        // Besitzer-Peer zuerst; ohne ihn existiert der Raum nicht
        let passwort = raum.konfig().passwort.clone();
        let infos = raum
            .beitreten(
                Arc::clone(&besitzer),
                schluessel,
                lokaler_port,
                passwort.as_deref(),
            )
            .await?;
        self.raeume.insert(id, Arc::clone(&raum));
        self.token_index.insert(token, id);
        self.reihenfolge.lock().push(id);

        if raum.konfig().auto_schliessen {
            self.idle_treiber_starten(&raum);
        }

        // Hook erst nach der Registrierung: trennt sich der Besitzer waehrend
        // der Erstellung, findet der sofort laufende Hook den Raum und baut
        // Mitgliedschaft und Peer wieder ab.
        self.hook_installieren(&besitzer, &raum);

        tracing::info!(raum = %id, titel = %raum.konfig().titel, "Raum erstellt");
        Ok((raum, infos))
    }

    /// Beitritt ueber das Beitritts-Token
    pub async fn beitreten(
        self: &Arc<Self>,
        token: &str,
        conn: Arc<Connection>,
        schluessel: &str,
        lokaler_port: u16,
        passwort: Option<&str>,
    ) -> RaumResult<(Arc<Raum>, Vec<MitgliedInfo>)> {
        let raum = self.per_token(token).ok_or(RaumError::UnbekanntesToken)?;
        let infos = raum
            .beitreten(Arc::clone(&conn), schluessel, lokaler_port, passwort)
            .await?;
        self.hook_installieren(&conn, &raum);
        Ok((raum, infos))
    }

    /// Austritt; traegt leere Raeume aus der Registry aus
    pub fn verlassen(&self, raum_id: RaumId, conn_id: ConnId) -> RaumResult<()> {
        let raum = self.holen(raum_id).ok_or(RaumError::NichtGefunden(raum_id))?;
        let leer = raum.verlassen(conn_id)?;
        if leer {
            self.austragen(&raum);
            tracing::info!(raum = %raum_id, "Leerer Raum ausgetragen");
        }
        Ok(())
    }

    /// Schliesst einen Raum endgueltig und entfernt ihn aus der Registry
    pub fn schliessen(&self, raum_id: RaumId) -> RaumResult<()> {
        let raum = self.holen(raum_id).ok_or(RaumError::NichtGefunden(raum_id))?;
        raum.schliessen();
        self.austragen(&raum);
        Ok(())
    }

    /// Schliesst alle Raeume, z.B. beim Server-Shutdown
    pub fn alle_schliessen(&self) {
        let alle: Vec<Arc<Raum>> = self.raeume.iter().map(|e| e.value().clone()).collect();
        for raum in alle {
            raum.schliessen();
            self.austragen(&raum);
        }
    }

    fn austragen(&self, raum: &Arc<Raum>) {
        self.raeume.remove(&raum.id());
        self.token_index.remove(raum.beitritts_token());
        self.reihenfolge.lock().retain(|id| *id != raum.id());
    }

    // -----------------------------------------------------------------------
    // Nachschlagen und Introspektion
    // -----------------------------------------------------------------------

    pub fn holen(&self, raum_id: RaumId) -> Option<Arc<Raum>> {
        self.raeume.get(&raum_id).map(|e| e.clone())
    }

    pub fn per_token(&self, token: &str) -> Option<Arc<Raum>> {
        self.token_index
            .get(token)
            .and_then(|e| self.holen(*e.value()))
    }

    pub fn anzahl(&self) -> usize {
        self.raeume.len()
    }

    /// Seitenweise Raumliste in Einfuegereihenfolge; Seiten sind 1-basiert
    pub fn liste(&self, seite: usize, groesse: usize) -> Vec<RaumInfo> {
        let reihenfolge = self.reihenfolge.lock();
        let start = seite.saturating_sub(1).saturating_mul(groesse);
        reihenfolge
            .iter()
            .skip(start)
            .take(groesse)
            .filter_map(|id| self.raeume.get(id).map(|e| e.info()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    /// Installiert den Abbau-Hook, der die Mitgliedschaft beim
    /// Verbindungsende zuruecknimmt
    fn hook_installieren(self: &Arc<Self>, conn: &Arc<Connection>, raum: &Arc<Raum>) {
        let verwaltung = Arc::clone(self);
        let raum_id = raum.id();
        let conn_id = conn.id();
        conn.abbau_hook_setzen(
            raum.hook_schluessel(),
            Box::new(move || {
                if let Err(e) = verwaltung.verlassen(raum_id, conn_id) {
                    tracing::debug!(raum = %raum_id, conn = %conn_id, fehler = %e,
                        "Teardown-Austritt uebersprungen");
                }
            }),
        );
    }

    fn idle_treiber_starten(self: &Arc<Self>, raum: &Arc<Raum>) {
        let verwaltung: Weak<Self> = Arc::downgrade(self);
        let raum_schwach: Weak<Raum> = Arc::downgrade(raum);
        let frist = self.idle_frist;
        let pruef_takt = (frist / 4).max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(pruef_takt).await;
                let (Some(verwaltung), Some(raum)) =
                    (verwaltung.upgrade(), raum_schwach.upgrade())
                else {
                    return;
                };
                if raum.ist_untaetig(frist) {
                    tracing::info!(raum = %raum.id(), "Raum wegen Untaetigkeit geschlossen");
                    let _ = verwaltung.schliessen(raum.id());
                    return;
                }
            }
        });
        raum.idle_treiber_setzen(handle);
    }
}

/// Erzeugt ein zufaelliges, nicht erratbares Beitritts-Token
fn beitritts_token_erzeugen() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LAENGE)
        .map(char::from)
        .collect()
}
