//! Connection – Zustand einer einzelnen persistenten Verbindung
//!
//! Die `Connection` haelt die Identitaet, die Auth-Projektion und die
//! drei begrenzten Queues einer Verbindung. Der Socket selbst gehoert dem
//! Verbindungs-Task in `tcp.rs`; alle anderen Komponenten senden nur ueber
//! die Ausgangs-Queue und blockieren dabei nie.
//!
//! ## Teardown
//! Abbau-Hooks werden unter einem String-Schluessel registriert und bei
//! `trennen()` genau einmal in umgekehrter Registrierungsreihenfolge
//! ausgefuehrt. Alle Abbau-Ausloeser (Lesefehler, Close-Frame, verpasster
//! Heartbeat, Lebensdauer, Server-Shutdown) laufen in dieselbe idempotente
//! Methode.

use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use tunnelwerk_auth::TokenAnspruch;
use tunnelwerk_core::ConnId;
use tunnelwerk_protocol::{Frame, Response};

use crate::error::{SessionError, SessionResult};
use tunnelwerk_protocol::Request;

/// Wartezeit beim Einreihen in Eingangs- und Ack-Queue bevor die Anfrage
/// als Ueberlast abgelehnt wird
pub const EINREIH_WARTEZEIT: Duration = Duration::from_secs(1);

/// Abbau-Hook, laeuft genau einmal beim Verbindungsende
pub type AbbauHook = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// Queue-Enden fuer den Verbindungs-Task
// ---------------------------------------------------------------------------

/// Empfangsseiten der Verbindungs-Queues
///
/// Gehoeren dem Verbindungs-Task; die `Connection` behaelt nur die
/// Sendeseiten.
pub struct VerbindungsKanaele {
    /// Ausgehende Frames (Writer-Task besitzt den Sink)
    pub ausgang: mpsc::Receiver<Frame>,
    /// Eingehende Requests fuer die Dispatch-Schleife
    pub eingang: mpsc::Receiver<Request>,
    /// Heartbeat-Acks fuer den Heartbeat-Treiber
    pub acks: mpsc::Receiver<u8>,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Zustand einer persistenten Verbindung
pub struct Connection {
    id: ConnId,
    adresse: SocketAddr,
    erstellt: Instant,
    geraet: RwLock<Option<String>>,

    ausgang: mpsc::Sender<Frame>,
    eingang: mpsc::Sender<Request>,
    acks: mpsc::Sender<u8>,

    auth: RwLock<Option<TokenAnspruch>>,
    hooks: Mutex<Option<Vec<(String, AbbauHook)>>>,
    getrennt: watch::Sender<bool>,
}

impl Connection {
    /// Erstellt eine Verbindung samt Queue-Empfangsseiten
    pub fn neu(adresse: SocketAddr, queue_tiefe: usize) -> (Arc<Self>, VerbindungsKanaele) {
        let (ausgang_tx, ausgang_rx) = mpsc::channel(queue_tiefe);
        let (eingang_tx, eingang_rx) = mpsc::channel(queue_tiefe);
        let (ack_tx, ack_rx) = mpsc::channel(queue_tiefe);
        let (getrennt, _) = watch::channel(false);

        let conn = Arc::new(Self {
            id: ConnId::new(),
            adresse,
            erstellt: Instant::now(),
            geraet: RwLock::new(None),
            ausgang: ausgang_tx,
            eingang: eingang_tx,
            acks: ack_tx,
            auth: RwLock::new(None),
            hooks: Mutex::new(Some(Vec::new())),
            getrennt,
        });
        let kanaele = VerbindungsKanaele {
            ausgang: ausgang_rx,
            eingang: eingang_rx,
            acks: ack_rx,
        };
        (conn, kanaele)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn adresse(&self) -> SocketAddr {
        self.adresse
    }

    /// Alter der Verbindung seit Annahme
    pub fn alter(&self) -> Duration {
        self.erstellt.elapsed()
    }

    /// Optionales Geraete-Etikett des Clients
    pub fn geraet(&self) -> Option<String> {
        self.geraet.read().clone()
    }

    pub fn geraet_setzen(&self, geraet: impl Into<String>) {
        *self.geraet.write() = Some(geraet.into());
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    /// Reiht einen Frame in die Ausgangs-Queue ein; blockiert nie
    ///
    /// Volle Queue ist ein Sendefehler, der Aufrufer entscheidet ueber die
    /// Konsequenz (Publisher werfen den Abonnenten raus, Raeume loggen).
    pub fn senden(&self, frame: Frame) -> SessionResult<()> {
        match self.ausgang.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::QueueVoll),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Getrennt),
        }
    }

    /// Serialisiert eine Response und reiht sie als Data-Frame ein
    pub fn antworten(&self, antwort: &Response) -> SessionResult<()> {
        let frame = Frame::data_json(antwort).map_err(SessionError::Io)?;
        self.senden(frame)
    }

    // -----------------------------------------------------------------------
    // Eingehende Queues (von der Lese-Schleife befuellt)
    // -----------------------------------------------------------------------

    /// Reiht einen Request ein; wartet begrenzt auf Platz
    pub async fn eingang_einreihen(&self, anfrage: Request) -> SessionResult<()> {
        self.eingang
            .send_timeout(anfrage, EINREIH_WARTEZEIT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SessionError::Ueberlastet,
                mpsc::error::SendTimeoutError::Closed(_) => SessionError::Getrennt,
            })
    }

    /// Reiht ein Heartbeat-Ack ein; wartet begrenzt auf Platz
    pub async fn ack_einreihen(&self, seq: u8) -> SessionResult<()> {
        self.acks
            .send_timeout(seq, EINREIH_WARTEZEIT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SessionError::Ueberlastet,
                mpsc::error::SendTimeoutError::Closed(_) => SessionError::Getrennt,
            })
    }

    // -----------------------------------------------------------------------
    // Auth-Projektion
    // -----------------------------------------------------------------------

    /// Hinterlegt die Auth-Projektion nach erfolgreicher Anmeldung
    pub fn auth_setzen(&self, anspruch: TokenAnspruch) {
        *self.auth.write() = Some(anspruch);
    }

    /// Entfernt die Auth-Projektion (Logout)
    pub fn auth_loeschen(&self) {
        *self.auth.write() = None;
    }

    /// Kopie der aktuellen Auth-Projektion
    pub fn auth(&self) -> Option<TokenAnspruch> {
        self.auth.read().clone()
    }

    /// True wenn angemeldet und der Anspruch noch nicht abgelaufen ist
    pub fn ist_angemeldet(&self) -> bool {
        self.auth
            .read()
            .as_ref()
            .map(|a| !a.ist_abgelaufen())
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Abbau-Hooks
    // -----------------------------------------------------------------------

    /// Registriert einen Abbau-Hook unter einem Schluessel
    ///
    /// Ein bereits vorhandener Hook mit demselben Schluessel wird ersetzt,
    /// behaelt aber seine urspruengliche Position in der Reihenfolge.
    /// Nach dem Trennen registrierte Hooks laufen sofort.
    pub fn abbau_hook_setzen(&self, schluessel: impl Into<String>, hook: AbbauHook) {
        let schluessel = schluessel.into();
        let mut hooks = self.hooks.lock();
        match hooks.as_mut() {
            Some(liste) => {
                if let Some(platz) = liste.iter_mut().find(|(k, _)| *k == schluessel) {
                    platz.1 = hook;
                } else {
                    liste.push((schluessel, hook));
                }
            }
            None => {
                drop(hooks);
                tracing::debug!(conn = %self.id, schluessel = %schluessel,
                    "Hook nach Trennung registriert, laeuft sofort");
                hook();
            }
        }
    }

    /// Entfernt einen Abbau-Hook, falls vorhanden
    pub fn abbau_hook_entfernen(&self, schluessel: &str) {
        if let Some(liste) = self.hooks.lock().as_mut() {
            liste.retain(|(k, _)| k != schluessel);
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Trennt die Verbindung; idempotent
    ///
    /// Die Hook-Liste wird atomar entnommen, damit konkurrierende Ausloeser
    /// die Hooks hoechstens einmal ausfuehren. Reihenfolge: umgekehrt zur
    /// Registrierung, danach Close-Frame und Abbruch der Schleifen.
    pub fn trennen(&self, grund: &str) {
        let hooks = self.hooks.lock().take();
        let Some(hooks) = hooks else {
            return;
        };

        tracing::info!(conn = %self.id, grund = %grund, "Verbindung wird getrennt");
        for (schluessel, hook) in hooks.into_iter().rev() {
            tracing::debug!(conn = %self.id, hook = %schluessel, "Abbau-Hook laeuft");
            hook();
        }

        // Best effort: Close ankuendigen, dann Schleifen stoppen
        let _ = self.ausgang.try_send(Frame::Close);
        let _ = self.getrennt.send(true);
    }

    /// True sobald `trennen()` gelaufen ist
    pub fn ist_getrennt(&self) -> bool {
        *self.getrennt.borrow()
    }

    /// Watch-Empfaenger fuer das Verbindungsende
    pub fn getrennt_beobachten(&self) -> watch::Receiver<bool> {
        self.getrennt.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("adresse", &self.adresse)
            .field("getrennt", &self.ist_getrennt())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_conn() -> (Arc<Connection>, VerbindungsKanaele) {
        Connection::neu("127.0.0.1:9000".parse().unwrap(), 8)
    }

    #[tokio::test]
    async fn hooks_laufen_umgekehrt_und_genau_einmal() {
        let (conn, _kanaele) = test_conn();
        let reihenfolge = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let protokoll = reihenfolge.clone();
            conn.abbau_hook_setzen(name, Box::new(move || protokoll.lock().push(name)));
        }

        conn.trennen("test");
        conn.trennen("test nochmal");

        assert_eq!(*reihenfolge.lock(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn hook_entfernen_verhindert_ausfuehrung() {
        let (conn, _kanaele) = test_conn();
        let zaehler = Arc::new(AtomicUsize::new(0));

        let z = zaehler.clone();
        conn.abbau_hook_setzen("x", Box::new(move || { z.fetch_add(1, Ordering::SeqCst); }));
        conn.abbau_hook_entfernen("x");
        conn.trennen("test");

        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hook_nach_trennung_laeuft_sofort() {
        let (conn, _kanaele) = test_conn();
        conn.trennen("test");

        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = zaehler.clone();
        conn.abbau_hook_setzen("spaet", Box::new(move || { z.fetch_add(1, Ordering::SeqCst); }));

        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ersetzter_hook_behaelt_position() {
        let (conn, _kanaele) = test_conn();
        let reihenfolge = Arc::new(Mutex::new(Vec::new()));

        let p = reihenfolge.clone();
        conn.abbau_hook_setzen("a", Box::new(move || p.lock().push("a-alt")));
        let p = reihenfolge.clone();
        conn.abbau_hook_setzen("b", Box::new(move || p.lock().push("b")));
        let p = reihenfolge.clone();
        conn.abbau_hook_setzen("a", Box::new(move || p.lock().push("a-neu")));

        conn.trennen("test");
        assert_eq!(*reihenfolge.lock(), vec!["b", "a-neu"]);
    }

    #[tokio::test]
    async fn volle_ausgangs_queue_ist_sendefehler() {
        let (conn, kanaele) = test_conn();
        // Queue fuellen ohne zu lesen
        for _ in 0..8 {
            conn.senden(Frame::Ping(0)).unwrap();
        }
        assert!(matches!(conn.senden(Frame::Ping(0)), Err(SessionError::QueueVoll)));
        drop(kanaele);
    }

    #[tokio::test]
    async fn eingang_einreihen_schlaegt_bei_ueberlast_fehl() {
        let (conn, kanaele) = test_conn();
        tokio::time::pause();

        for i in 0..8 {
            conn.eingang_einreihen(Request::neu(i.to_string(), "system.ping", vec![]))
                .await
                .unwrap();
        }
        let ergebnis = conn
            .eingang_einreihen(Request::neu("9", "system.ping", vec![]))
            .await;
        assert!(matches!(ergebnis, Err(SessionError::Ueberlastet)));
        drop(kanaele);
    }

    #[tokio::test]
    async fn auth_projektion_ist_schnappschuss() {
        let (conn, _kanaele) = test_conn();
        assert!(!conn.ist_angemeldet());

        let anspruch = TokenAnspruch {
            user_id: tunnelwerk_core::UserId::new(),
            username: "martha".into(),
            permissions: vec!["kanal.senden".into()],
            ablauf: chrono::Utc::now() + chrono::Duration::hours(1),
        };
        conn.auth_setzen(anspruch.clone());
        assert!(conn.ist_angemeldet());
        assert_eq!(conn.auth().unwrap().username, "martha");

        conn.auth_loeschen();
        assert!(conn.auth().is_none());
    }
}
