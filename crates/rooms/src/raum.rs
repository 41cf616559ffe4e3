//! Raum – Mitgliedschaft, Besitzer, Sperr-Flag, Benachrichtigungen
//!
//! Ein Raum verdrahtet seine Mitglieder ueber den Tunnel-Adapter zu einem
//! privaten virtuellen LAN. Der gesamte veraenderliche Zustand liegt hinter
//! einer einzigen Sperre; Aufrufe in andere Komponenten (Tunnel-Adapter,
//! Verbindungs-Queues) passieren grundsaetzlich erst nach Schnappschuss und
//! Freigabe der Sperre.
//!
//! ## Zustandsmaschine
//! ```text
//! Aktiv <-> Verboten -> Schliessend -> Geschlossen
//! ```
//! `Geschlossen` ist endgueltig; ein geschlossener Raum wird nur noch aus
//! der Verwaltung entfernt, nie wiederbelebt.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tunnelwerk_core::{ConnId, RaumId, UserId, VlanId};
use tunnelwerk_protocol::{PublishEnvelope, Response};
use tunnelwerk_session::Connection;
use tunnelwerk_tunnel::{EndpunktHook, TunnelAdapter, TunnelError};

use crate::error::{RaumError, RaumResult};

// ---------------------------------------------------------------------------
// Konfiguration und Datentypen
// ---------------------------------------------------------------------------

/// Konfiguration eines Raums, vom Ersteller vorgegeben
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RaumKonfig {
    pub titel: String,
    pub beschreibung: String,
    /// 0 bedeutet unbegrenzt
    pub max_mitglieder: usize,
    pub passwort: Option<String>,
    pub ip_sperrliste: Vec<IpAddr>,
    pub benutzer_sperrliste: Vec<UserId>,
    pub geraete_sperrliste: Vec<String>,
    /// Raum schliesst sich nach laengerer Untaetigkeit selbst
    pub auto_schliessen: bool,
}

/// Zustand des Raums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaumZustand {
    Aktiv,
    /// Beitritte abgelehnt, Bestandsmitglieder unberuehrt
    Verboten,
    Schliessend,
    Geschlossen,
}

/// Mitglied samt Tunnel-Attributen
struct Mitglied {
    conn: Arc<Connection>,
    benutzer: Option<UserId>,
    name: String,
    vlan: VlanId,
    oeffentlicher_schluessel: String,
    lokaler_port: u16,
    endpunkt: Option<SocketAddr>,
}

/// Mitgliedsinfo fuer Beitritts-Antworten und die Mitbewohner-Abfrage
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MitgliedInfo {
    pub verbindung: uuid::Uuid,
    pub benutzer: Option<uuid::Uuid>,
    pub name: String,
    pub adresse: String,
    pub besitzer: bool,
    pub vlan: u16,
    pub oeffentlicher_schluessel: String,
    pub lokaler_port: u16,
    pub endpunkt: Option<SocketAddr>,
}

/// Kurzinfo fuer die Raumliste
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaumInfo {
    pub id: uuid::Uuid,
    pub titel: String,
    pub mitglieder: usize,
    pub gesperrt: bool,
    pub erstellt: DateTime<Utc>,
}

struct Inner {
    zustand: RaumZustand,
    mitglieder: HashMap<ConnId, Mitglied>,
    /// Beitrittsreihenfolge, bestimmt die Besitzer-Nachfolge
    reihenfolge: Vec<ConnId>,
    besitzer: Option<ConnId>,
}

// ---------------------------------------------------------------------------
// Raum
// ---------------------------------------------------------------------------

/// Ein Raum mit Mitgliedern, Besitzer und Tunnel-Peers
pub struct Raum {
    id: RaumId,
    beitritts_token: String,
    konfig: RaumKonfig,
    erstellt: DateTime<Utc>,
    adapter: Arc<TunnelAdapter>,
    inner: Mutex<Inner>,
    zuletzt_aktiv: Mutex<Instant>,
    idle_treiber: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Raum {
    pub fn neu(
        id: RaumId,
        beitritts_token: String,
        konfig: RaumKonfig,
        adapter: Arc<TunnelAdapter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            beitritts_token,
            konfig,
            erstellt: Utc::now(),
            adapter,
            inner: Mutex::new(Inner {
                zustand: RaumZustand::Aktiv,
                mitglieder: HashMap::new(),
                reihenfolge: Vec::new(),
                besitzer: None,
            }),
            zuletzt_aktiv: Mutex::new(Instant::now()),
            idle_treiber: Mutex::new(None),
        })
    }

    pub fn id(&self) -> RaumId {
        self.id
    }

    pub fn beitritts_token(&self) -> &str {
        &self.beitritts_token
    }

    pub fn konfig(&self) -> &RaumKonfig {
        &self.konfig
    }

    pub fn zustand(&self) -> RaumZustand {
        self.inner.lock().zustand
    }

    pub fn besitzer(&self) -> Option<ConnId> {
        self.inner.lock().besitzer
    }

    pub fn mitglieder_anzahl(&self) -> usize {
        self.inner.lock().mitglieder.len()
    }

    pub fn ist_mitglied(&self, conn_id: ConnId) -> bool {
        self.inner.lock().mitglieder.contains_key(&conn_id)
    }

    /// Schluessel des Abbau-Hooks an der Mitglieds-Verbindung
    pub fn hook_schluessel(&self) -> String {
        format!("publish.raum.{}", self.id.inner())
    }

    pub fn info(&self) -> RaumInfo {
        let inner = self.inner.lock();
        RaumInfo {
            id: self.id.inner(),
            titel: self.konfig.titel.clone(),
            mitglieder: inner.mitglieder.len(),
            gesperrt: inner.zustand == RaumZustand::Verboten,
            erstellt: self.erstellt,
        }
    }

    // -----------------------------------------------------------------------
    // Beitritt
    // -----------------------------------------------------------------------

    /// Nimmt eine Verbindung als Mitglied auf
    ///
    /// Der Tunnel-Peer wird ausserhalb der Mitglieder-Sperre angelegt:
    /// erst Schnappschuss-Validierung, dann Peer, dann erneut unter der
    /// Sperre nachpruefen. Verliert der Beitritt das Rennen um den letzten
    /// Platz, wird der Peer zurueckgebaut.
    ///
    /// Ein erneuter Beitritt desselben Mitglieds ist ein idempotenter
    /// Erfolg. Gibt die Mitgliederliste nach dem Beitritt zurueck.
    pub async fn beitreten(
        self: &Arc<Self>,
        conn: Arc<Connection>,
        schluessel: &str,
        lokaler_port: u16,
        passwort: Option<&str>,
    ) -> RaumResult<Vec<MitgliedInfo>> {
        let conn_id = conn.id();
        let anspruch = conn.auth();

        // Phase 1: Validierung unter der Sperre, danach sofort freigeben
        {
            let inner = self.inner.lock();
            match inner.zustand {
                RaumZustand::Aktiv => {}
                RaumZustand::Verboten => return Err(RaumError::Verboten),
                _ => return Err(RaumError::Geschlossen),
            }
            if inner.mitglieder.contains_key(&conn_id) {
                return Ok(self.info_liste(&inner));
            }
            self.zutritt_pruefen(&inner, &conn, passwort)?;
        }

        // Phase 2: Peer ohne Sperre anlegen
        let schwach = Arc::downgrade(self);
        let hook: EndpunktHook = Arc::new(move |conn_id, adresse| {
            if let Some(raum) = schwach.upgrade() {
                if let Err(e) = raum.endpunkt_aktualisieren(conn_id, adresse) {
                    tracing::debug!(raum = %raum.id, fehler = %e, "Endpunkt-Notiz verworfen");
                }
            }
        });
        let vlan = match self
            .adapter
            .peer_hinzufuegen(conn_id, schluessel, lokaler_port, Some(hook))
            .await
        {
            Ok(vlan) => vlan,
            // Paralleler Beitritt derselben Verbindung hat gewonnen
            Err(TunnelError::PeerExistiert(_)) => {
                let inner = self.inner.lock();
                return Ok(self.info_liste(&inner));
            }
            Err(e) => return Err(e.into()),
        };

        // Phase 3: zurueck unter die Sperre, Rennen aufloesen
        let (infos, bestand, name, benutzer) = {
            let mut inner = self.inner.lock();
            if inner.zustand != RaumZustand::Aktiv {
                drop(inner);
                self.adapter.peer_entfernen(conn_id);
                return Err(match self.zustand() {
                    RaumZustand::Verboten => RaumError::Verboten,
                    _ => RaumError::Geschlossen,
                });
            }
            if self.ist_voll(&inner) {
                drop(inner);
                self.adapter.peer_entfernen(conn_id);
                return Err(RaumError::Voll);
            }

            let bestand: Vec<Arc<Connection>> =
                inner.mitglieder.values().map(|m| Arc::clone(&m.conn)).collect();
            let (benutzer, name) = match &anspruch {
                Some(a) => (Some(a.user_id), a.username.clone()),
                None => (None, format!("gast-{}", conn_id.inner().simple())),
            };
            inner.mitglieder.insert(
                conn_id,
                Mitglied {
                    conn: Arc::clone(&conn),
                    benutzer,
                    name: name.clone(),
                    vlan,
                    oeffentlicher_schluessel: schluessel.to_string(),
                    lokaler_port,
                    endpunkt: None,
                },
            );
            inner.reihenfolge.push(conn_id);
            if inner.besitzer.is_none() {
                inner.besitzer = Some(conn_id);
            }
            (self.info_liste(&inner), bestand, name, benutzer)
        };

        tracing::info!(raum = %self.id, conn = %conn_id, name = %name, %vlan, "Beitritt");
        self.aktivitaet_vermerken();
        self.zustellen(
            &bestand,
            "beigetreten",
            json!({
                "verbindung": conn_id.inner(),
                "benutzer": benutzer.map(|u| u.inner()),
                "name": name,
                "adresse": vlan.private_adresse(),
            }),
        );
        Ok(infos)
    }

    fn zutritt_pruefen(
        &self,
        inner: &Inner,
        conn: &Arc<Connection>,
        passwort: Option<&str>,
    ) -> RaumResult<()> {
        if let Some(erwartet) = &self.konfig.passwort {
            if passwort != Some(erwartet.as_str()) {
                return Err(RaumError::FalschesPasswort);
            }
        }
        if self.konfig.ip_sperrliste.contains(&conn.adresse().ip()) {
            return Err(RaumError::AufSperrliste("IP-Adresse".into()));
        }
        if let Some(anspruch) = conn.auth() {
            if self.konfig.benutzer_sperrliste.contains(&anspruch.user_id) {
                return Err(RaumError::AufSperrliste("Benutzer".into()));
            }
        }
        if let Some(geraet) = conn.geraet() {
            if self.konfig.geraete_sperrliste.contains(&geraet) {
                return Err(RaumError::AufSperrliste("Geraet".into()));
            }
        }
        if self.ist_voll(inner) {
            return Err(RaumError::Voll);
        }
        Ok(())
    }

    fn ist_voll(&self, inner: &Inner) -> bool {
        self.konfig.max_mitglieder > 0 && inner.mitglieder.len() >= self.konfig.max_mitglieder
    }

    // -----------------------------------------------------------------------
    // Verlassen
    // -----------------------------------------------------------------------

    /// Entfernt ein Mitglied; idempotent
    ///
    /// Verlaesst der Besitzer einen nicht leeren Raum, rueckt das am
    /// laengsten anwesende verbliebene Mitglied nach. Gibt true zurueck,
    /// wenn der Raum dadurch leer wurde (die Verwaltung traegt ihn dann aus).
    pub fn verlassen(&self, conn_id: ConnId) -> RaumResult<bool> {
        let (mitglied, nachfolger, verbliebene, leer) = {
            let mut inner = self.inner.lock();
            let Some(mitglied) = inner.mitglieder.remove(&conn_id) else {
                return Ok(inner.mitglieder.is_empty());
            };
            inner.reihenfolge.retain(|c| *c != conn_id);

            let mut nachfolger = None;
            if inner.besitzer == Some(conn_id) {
                inner.besitzer = inner.reihenfolge.first().copied();
                nachfolger = inner.besitzer.and_then(|id| {
                    inner
                        .mitglieder
                        .get(&id)
                        .map(|m| (id, m.name.clone()))
                });
            }

            let leer = inner.mitglieder.is_empty();
            if leer {
                inner.zustand = RaumZustand::Geschlossen;
                inner.besitzer = None;
            }
            let verbliebene: Vec<Arc<Connection>> =
                inner.mitglieder.values().map(|m| Arc::clone(&m.conn)).collect();
            (mitglied, nachfolger, verbliebene, leer)
        };

        self.adapter.peer_entfernen(conn_id);
        mitglied.conn.abbau_hook_entfernen(&self.hook_schluessel());
        tracing::info!(raum = %self.id, conn = %conn_id, name = %mitglied.name, "Mitglied verlaesst Raum");

        self.zustellen(
            &verbliebene,
            "verlassen",
            json!({
                "verbindung": conn_id.inner(),
                "name": mitglied.name,
            }),
        );
        if let Some((neuer_id, neuer_name)) = nachfolger {
            tracing::info!(raum = %self.id, conn = %neuer_id, name = %neuer_name, "Besitzerwechsel");
            self.zustellen(
                &verbliebene,
                "besitzerwechsel",
                json!({
                    "verbindung": neuer_id.inner(),
                    "name": neuer_name,
                }),
            );
        }
        if leer {
            self.idle_treiber_stoppen();
        }
        Ok(leer)
    }

    // -----------------------------------------------------------------------
    // Schliessen und Sperren
    // -----------------------------------------------------------------------

    /// Schliesst den Raum endgueltig, unabhaengig von der Mitgliederzahl
    ///
    /// Die Schliessungs-Notiz geht vor dem Abbau raus, damit sie die
    /// Mitglieder noch erreicht.
    pub fn schliessen(&self) {
        let mitglieder = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.zustand,
                RaumZustand::Schliessend | RaumZustand::Geschlossen
            ) {
                return;
            }
            inner.zustand = RaumZustand::Schliessend;
            inner.besitzer = None;
            inner.reihenfolge.clear();
            inner.mitglieder.drain().map(|(_, m)| m).collect::<Vec<_>>()
        };

        let conns: Vec<Arc<Connection>> =
            mitglieder.iter().map(|m| Arc::clone(&m.conn)).collect();
        self.zustellen(&conns, "geschlossen", json!({ "raum": self.id.inner() }));

        for mitglied in &mitglieder {
            self.adapter.peer_entfernen(mitglied.conn.id());
            mitglied.conn.abbau_hook_entfernen(&self.hook_schluessel());
        }

        self.inner.lock().zustand = RaumZustand::Geschlossen;
        self.idle_treiber_stoppen();
        tracing::info!(raum = %self.id, "Raum geschlossen");
    }

    /// Setzt oder loest das Sperr-Flag; Bestandsmitglieder bleiben
    pub fn sperren(&self, gesperrt: bool) {
        let conns = {
            let mut inner = self.inner.lock();
            match (inner.zustand, gesperrt) {
                (RaumZustand::Aktiv, true) => inner.zustand = RaumZustand::Verboten,
                (RaumZustand::Verboten, false) => inner.zustand = RaumZustand::Aktiv,
                _ => return,
            }
            inner
                .mitglieder
                .values()
                .map(|m| Arc::clone(&m.conn))
                .collect::<Vec<_>>()
        };
        tracing::info!(raum = %self.id, gesperrt, "Sperr-Flag geaendert");
        self.zustellen(&conns, "gesperrt", json!({ "gesperrt": gesperrt }));
    }

    // -----------------------------------------------------------------------
    // Endpunkt-Korrektur und Nachrichten
    // -----------------------------------------------------------------------

    /// Vermerkt den beobachteten Transport-Endpunkt eines Mitglieds
    ///
    /// Wird vom Endpunkt-Hook des Tunnel-Adapters getrieben, wenn ein
    /// NAT-Rebinding die Quelladresse eines Peers verschiebt.
    pub fn endpunkt_aktualisieren(&self, conn_id: ConnId, adresse: SocketAddr) -> RaumResult<()> {
        let conns = {
            let mut inner = self.inner.lock();
            let Some(mitglied) = inner.mitglieder.get_mut(&conn_id) else {
                return Err(RaumError::KeinMitglied);
            };
            mitglied.endpunkt = Some(adresse);
            inner
                .mitglieder
                .values()
                .map(|m| Arc::clone(&m.conn))
                .collect::<Vec<_>>()
        };
        self.zustellen(
            &conns,
            "endpunkt",
            json!({
                "verbindung": conn_id.inner(),
                "endpunkt": adresse,
            }),
        );
        Ok(())
    }

    /// Verteilt eine Mitglieds-Nachricht an alle anderen Mitglieder
    pub fn nachricht(&self, data: Value, absender: &Arc<Connection>) -> RaumResult<()> {
        let conns = {
            let inner = self.inner.lock();
            if !inner.mitglieder.contains_key(&absender.id()) {
                return Err(RaumError::KeinMitglied);
            }
            inner
                .mitglieder
                .values()
                .filter(|m| m.conn.id() != absender.id())
                .map(|m| Arc::clone(&m.conn))
                .collect::<Vec<_>>()
        };

        let (sender_id, sender_name) = match absender.auth() {
            Some(a) => (Some(a.user_id.inner()), a.username),
            None => (None, "gast".to_string()),
        };
        let umschlag = PublishEnvelope::neu(sender_id, sender_name, data);
        self.aktivitaet_vermerken();
        self.zustellen(
            &conns,
            "nachricht",
            serde_json::to_value(&umschlag).unwrap_or(Value::Null),
        );
        Ok(())
    }

    /// Mitgliederliste in Beitrittsreihenfolge
    pub fn mitglieder(&self) -> Vec<MitgliedInfo> {
        let inner = self.inner.lock();
        self.info_liste(&inner)
    }

    fn info_liste(&self, inner: &Inner) -> Vec<MitgliedInfo> {
        inner
            .reihenfolge
            .iter()
            .filter_map(|conn_id| {
                inner.mitglieder.get(conn_id).map(|m| MitgliedInfo {
                    verbindung: conn_id.inner(),
                    benutzer: m.benutzer.map(|u| u.inner()),
                    name: m.name.clone(),
                    adresse: m.vlan.private_adresse(),
                    besitzer: inner.besitzer == Some(*conn_id),
                    vlan: m.vlan.0,
                    oeffentlicher_schluessel: m.oeffentlicher_schluessel.clone(),
                    lokaler_port: m.lokaler_port,
                    endpunkt: m.endpunkt,
                })
            })
            .collect()
    }

    /// Push an eine Empfaengerliste; blockiert nie
    fn zustellen(&self, conns: &[Arc<Connection>], ereignis: &str, daten: Value) {
        let antwort = Response::publish(
            uuid::Uuid::new_v4().to_string(),
            self.hook_schluessel(),
            json!({ "ereignis": ereignis, "daten": daten }),
        );
        for conn in conns {
            if let Err(e) = conn.antworten(&antwort) {
                tracing::debug!(
                    raum = %self.id,
                    conn = %conn.id(),
                    ereignis = %ereignis,
                    fehler = %e,
                    "Raum-Notiz nicht zustellbar"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Untaetigkeit
    // -----------------------------------------------------------------------

    pub fn aktivitaet_vermerken(&self) {
        *self.zuletzt_aktiv.lock() = Instant::now();
    }

    /// True wenn seit der letzten Aktivitaet mehr als `frist` vergangen ist
    pub fn ist_untaetig(&self, frist: Duration) -> bool {
        self.zuletzt_aktiv.lock().elapsed() > frist
    }

    pub(crate) fn idle_treiber_setzen(&self, handle: tokio::task::JoinHandle<()>) {
        if let Some(alter) = self.idle_treiber.lock().replace(handle) {
            alter.abort();
        }
    }

    fn idle_treiber_stoppen(&self) {
        if let Some(handle) = self.idle_treiber.lock().take() {
            handle.abort();
        }
    }
}
