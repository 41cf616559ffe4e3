//! Publisher – benannter Broadcast-Kanal mit optionalem Zeitplan
//!
//! Ein Publisher haelt seine Abonnenten als `ConnId -> Arc<Connection>`.
//! Veroeffentlichungen nehmen einen Schnappschuss der Abonnenten unter der
//! Sperre, geben sie frei und senden erst dann; der Sendeweg ist die
//! begrenzte Ausgangs-Queue der Verbindung und blockiert nie.
//!
//! Zustellung ist best effort, hoechstens einmal: schlaegt das Einreihen
//! fehl, fliegt der Abonnent raus.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tunnelwerk_core::ConnId;
use tunnelwerk_protocol::{PublishEnvelope, Response};
use tunnelwerk_session::Connection;

use crate::error::{PubSubError, PubSubResult};

/// Erzeugt die Nutzlast fuer zeitplangesteuerte Veroeffentlichungen
pub type Generator = Arc<dyn Fn() -> Value + Send + Sync>;

// ---------------------------------------------------------------------------
// Zeitplan
// ---------------------------------------------------------------------------

/// Zeitplan eines Publishers
///
/// Eine humantime-Dauer (`"30s"`, `"5m"`) laeuft als fester Takt, alles
/// andere muss ein Cron-Ausdruck sein.
pub enum Zeitplan {
    Intervall(Duration),
    Cron(Box<cron::Schedule>),
}

impl Zeitplan {
    pub fn parsen(text: &str) -> PubSubResult<Self> {
        if let Ok(dauer) = humantime::parse_duration(text) {
            return Ok(Self::Intervall(dauer));
        }
        cron::Schedule::from_str(text)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| PubSubError::UngueltigerZeitplan(format!("{text}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Benannter Broadcast-Kanal
pub struct Publisher {
    name: String,
    abonnenten: RwLock<HashMap<ConnId, Arc<Connection>>>,
    geschlossen: AtomicBool,
    generator: Option<Generator>,
    treiber: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Publisher {
    pub fn neu(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            abonnenten: RwLock::new(HashMap::new()),
            geschlossen: AtomicBool::new(false),
            generator: None,
            treiber: Mutex::new(None),
        })
    }

    /// Publisher mit Generator fuer zeitplangesteuerte Nutzlasten
    pub fn mit_generator(name: impl Into<String>, generator: Generator) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            abonnenten: RwLock::new(HashMap::new()),
            geschlossen: AtomicBool::new(false),
            generator: Some(generator),
            treiber: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook-Schluessel an der Verbindung
    fn hook_schluessel(&self) -> String {
        format!("publish.{}", self.name)
    }

    pub fn abonnenten_anzahl(&self) -> usize {
        self.abonnenten.read().len()
    }

    // -----------------------------------------------------------------------
    // Abonnements
    // -----------------------------------------------------------------------

    /// Nimmt eine Verbindung als Abonnent auf
    ///
    /// Installiert einen Abbau-Hook, der das Abonnement beim
    /// Verbindungsende zuruecknimmt.
    pub fn abonnieren(self: &Arc<Self>, conn: Arc<Connection>) -> PubSubResult<()> {
        if self.geschlossen.load(Ordering::SeqCst) {
            return Err(PubSubError::Geschlossen(self.name.clone()));
        }
        let conn_id = conn.id();
        {
            let mut abonnenten = self.abonnenten.write();
            if abonnenten.contains_key(&conn_id) {
                return Err(PubSubError::BereitsAbonniert(self.name.clone()));
            }
            abonnenten.insert(conn_id, Arc::clone(&conn));
        }

        let publisher = Arc::clone(self);
        conn.abbau_hook_setzen(
            self.hook_schluessel(),
            Box::new(move || {
                publisher.abonnent_austragen(conn_id);
            }),
        );
        tracing::debug!(publisher = %self.name, conn = %conn_id, "Abonnement aufgenommen");
        Ok(())
    }

    /// Beendet ein Abonnement; idempotent
    pub fn abbestellen(&self, conn: &Connection) {
        self.abonnent_austragen(conn.id());
        conn.abbau_hook_entfernen(&self.hook_schluessel());
    }

    fn abonnent_austragen(&self, conn_id: ConnId) {
        if self.abonnenten.write().remove(&conn_id).is_some() {
            tracing::debug!(publisher = %self.name, conn = %conn_id, "Abonnement beendet");
        }
    }

    // -----------------------------------------------------------------------
    // Veroeffentlichen
    // -----------------------------------------------------------------------

    /// Sendet eine Nutzlast an alle Abonnenten ausser dem Absender
    ///
    /// Schnappschuss unter der Sperre, Versand danach. Gibt die Zahl der
    /// erreichten Abonnenten zurueck; Abonnenten mit voller Queue werden
    /// ausgetragen.
    pub fn veroeffentlichen(&self, data: Value, absender: Option<ConnId>) -> PubSubResult<usize> {
        if self.geschlossen.load(Ordering::SeqCst) {
            return Err(PubSubError::Geschlossen(self.name.clone()));
        }

        let schnappschuss: Vec<(ConnId, Arc<Connection>)> = {
            let abonnenten = self.abonnenten.read();
            abonnenten
                .iter()
                .filter(|(id, _)| Some(**id) != absender)
                .map(|(id, conn)| (*id, Arc::clone(conn)))
                .collect()
        };

        let antwort = Response::publish(
            uuid::Uuid::new_v4().to_string(),
            format!("publish.{}", self.name),
            data,
        );

        let mut erreicht = 0;
        for (conn_id, conn) in schnappschuss {
            match conn.antworten(&antwort) {
                Ok(()) => erreicht += 1,
                Err(e) => {
                    tracing::warn!(
                        publisher = %self.name,
                        conn = %conn_id,
                        fehler = %e,
                        "Zustellung fehlgeschlagen, Abonnent fliegt raus"
                    );
                    self.abonnent_austragen(conn_id);
                    conn.abbau_hook_entfernen(&self.hook_schluessel());
                }
            }
        }
        Ok(erreicht)
    }

    /// Verpackt eine Nutzlast mit Absender-Metadaten und veroeffentlicht
    ///
    /// Fire and forget: Fehler werden geloggt, der Aufrufer blockiert nie.
    pub fn nachricht(&self, data: Value, absender: Option<&Arc<Connection>>) {
        let (sender_id, sender_name) = match absender.and_then(|c| c.auth()) {
            Some(anspruch) => (Some(anspruch.user_id.inner()), anspruch.username),
            None => (None, "system".to_string()),
        };
        let umschlag = PublishEnvelope::neu(sender_id, sender_name, data);
        let nutzlast = match serde_json::to_value(&umschlag) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(publisher = %self.name, fehler = %e, "Umschlag nicht serialisierbar");
                return;
            }
        };
        if let Err(e) = self.veroeffentlichen(nutzlast, absender.map(|c| c.id())) {
            tracing::debug!(publisher = %self.name, fehler = %e, "Nachricht verworfen");
        }
    }

    // -----------------------------------------------------------------------
    // Zeitplan-Treiber
    // -----------------------------------------------------------------------

    /// Startet den Hintergrund-Treiber fuer den Zeitplan
    ///
    /// Ohne Generator gibt es nichts zu veroeffentlichen; der Aufruf ist
    /// dann ein geloggtes No-op.
    pub fn starten(self: &Arc<Self>, zeitplan: &str) -> PubSubResult<()> {
        let zeitplan = Zeitplan::parsen(zeitplan)?;
        if self.generator.is_none() {
            tracing::warn!(publisher = %self.name, "Zeitplan ohne Generator, Treiber startet nicht");
            return Ok(());
        }

        let publisher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match zeitplan {
                Zeitplan::Intervall(dauer) => {
                    let mut takt = tokio::time::interval(dauer);
                    takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    takt.tick().await; // erster Tick feuert sofort
                    loop {
                        takt.tick().await;
                        if !publisher.generator_feuern() {
                            break;
                        }
                    }
                }
                Zeitplan::Cron(schedule) => loop {
                    let Some(naechster) = schedule.upcoming(chrono::Utc).next() else {
                        break;
                    };
                    let dauer = (naechster - chrono::Utc::now())
                        .to_std()
                        .unwrap_or_default();
                    tokio::time::sleep(dauer).await;
                    if !publisher.generator_feuern() {
                        break;
                    }
                },
            }
        });

        let alter = self.treiber.lock().replace(handle);
        if let Some(alter) = alter {
            alter.abort();
        }
        Ok(())
    }

    /// Stoppt Treiber und Publisher; weitere Veroeffentlichungen schlagen fehl
    pub fn stoppen(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
        if let Some(handle) = self.treiber.lock().take() {
            handle.abort();
        }

        let schnappschuss: Vec<Arc<Connection>> =
            self.abonnenten.write().drain().map(|(_, c)| c).collect();
        for conn in schnappschuss {
            conn.abbau_hook_entfernen(&self.hook_schluessel());
        }
        tracing::info!(publisher = %self.name, "Publisher gestoppt");
    }

    /// Feuert den Generator einmal; false beendet den Treiber
    fn generator_feuern(&self) -> bool {
        let Some(generator) = &self.generator else {
            return false;
        };
        let data = generator();
        match self.veroeffentlichen(data, None) {
            Ok(erreicht) => {
                tracing::trace!(publisher = %self.name, erreicht, "Zeitplan-Veroeffentlichung");
                true
            }
            Err(PubSubError::Geschlossen(_)) => false,
            Err(e) => {
                tracing::warn!(publisher = %self.name, fehler = %e, "Veroeffentlichung fehlgeschlagen");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tunnelwerk_protocol::Frame;
    use tunnelwerk_session::VerbindungsKanaele;

    fn test_conn() -> (Arc<Connection>, VerbindungsKanaele) {
        Connection::neu("127.0.0.1:9000".parse().unwrap(), 8)
    }

    fn empfangen(kanaele: &mut VerbindungsKanaele) -> Option<Response> {
        match kanaele.ausgang.try_recv() {
            Ok(Frame::Data(bytes)) => Some(serde_json::from_slice(&bytes).unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn doppeltes_abonnement_ist_fehler() {
        let publisher = Publisher::neu("status");
        let (conn, _kanaele) = test_conn();

        publisher.abonnieren(Arc::clone(&conn)).unwrap();
        assert!(matches!(
            publisher.abonnieren(conn),
            Err(PubSubError::BereitsAbonniert(_))
        ));
    }

    #[tokio::test]
    async fn absender_empfaengt_nicht() {
        let publisher = Publisher::neu("chat");
        let (sender, mut sender_kanaele) = test_conn();
        let (leser, mut leser_kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&sender)).unwrap();
        publisher.abonnieren(Arc::clone(&leser)).unwrap();

        let erreicht = publisher
            .veroeffentlichen(json!("hallo"), Some(sender.id()))
            .unwrap();

        assert_eq!(erreicht, 1);
        assert!(empfangen(&mut sender_kanaele).is_none());
        let antwort = empfangen(&mut leser_kanaele).unwrap();
        assert_eq!(antwort.method, "publish.chat");
        assert_eq!(antwort.data, json!("hallo"));
    }

    #[tokio::test]
    async fn verbindungsende_beendet_abonnement() {
        let publisher = Publisher::neu("status");
        let (conn, _kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&conn)).unwrap();
        assert_eq!(publisher.abonnenten_anzahl(), 1);

        conn.trennen("test");
        assert_eq!(publisher.abonnenten_anzahl(), 0);
    }

    #[tokio::test]
    async fn abbestellen_ist_idempotent() {
        let publisher = Publisher::neu("status");
        let (conn, _kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&conn)).unwrap();

        publisher.abbestellen(&conn);
        publisher.abbestellen(&conn);
        assert_eq!(publisher.abonnenten_anzahl(), 0);

        // Hook ist entfernt, Trennung loest nichts mehr aus
        conn.trennen("test");
    }

    #[tokio::test]
    async fn volle_queue_wirft_abonnenten_raus() {
        let publisher = Publisher::neu("flut");
        let (conn, kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&conn)).unwrap();

        // Queue fuellen, ohne dass jemand liest
        for _ in 0..8 {
            conn.senden(Frame::Ping(0)).unwrap();
        }
        let erreicht = publisher.veroeffentlichen(json!(1), None).unwrap();

        assert_eq!(erreicht, 0);
        assert_eq!(publisher.abonnenten_anzahl(), 0);
        drop(kanaele);
    }

    #[tokio::test]
    async fn gestoppter_publisher_lehnt_ab() {
        let publisher = Publisher::neu("ende");
        let (conn, _kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&conn)).unwrap();

        publisher.stoppen();
        assert!(matches!(
            publisher.veroeffentlichen(json!(1), None),
            Err(PubSubError::Geschlossen(_))
        ));
        assert!(matches!(
            publisher.abonnieren(conn),
            Err(PubSubError::Geschlossen(_))
        ));
    }

    #[tokio::test]
    async fn nachricht_traegt_umschlag() {
        let publisher = Publisher::neu("chat");
        let (leser, mut leser_kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&leser)).unwrap();

        publisher.nachricht(json!("hallo"), None);
        let antwort = empfangen(&mut leser_kanaele).unwrap();

        assert_eq!(antwort.data["senderName"], json!("system"));
        assert_eq!(antwort.data["data"], json!("hallo"));
        assert!(antwort.data["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn intervall_treiber_veroeffentlicht() {
        let publisher =
            Publisher::mit_generator("uhr", Arc::new(|| json!({ "tick": true })));
        let (leser, mut leser_kanaele) = test_conn();
        publisher.abonnieren(Arc::clone(&leser)).unwrap();

        publisher.starten("20ms").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        publisher.stoppen();

        let mut zaehler = 0;
        while empfangen(&mut leser_kanaele).is_some() {
            zaehler += 1;
        }
        assert!(zaehler >= 2, "Treiber muss mehrfach gefeuert haben");
    }

    #[tokio::test]
    async fn ungueltiger_zeitplan_ist_fehler() {
        let publisher = Publisher::mit_generator("kaputt", Arc::new(|| json!(null)));
        assert!(matches!(
            publisher.starten("weder dauer noch cron"),
            Err(PubSubError::UngueltigerZeitplan(_))
        ));
    }

    #[test]
    fn zeitplan_parsen_unterscheidet_formen() {
        assert!(matches!(Zeitplan::parsen("30s"), Ok(Zeitplan::Intervall(_))));
        assert!(matches!(
            Zeitplan::parsen("0 */5 * * * *"),
            Ok(Zeitplan::Cron(_))
        ));
        assert!(Zeitplan::parsen("").is_err());
    }
}
