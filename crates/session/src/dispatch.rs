//! Dispatch-Engine – fuehrt Handler-Ketten mit Zeitlimit aus
//!
//! Pro Anfrage laeuft ein eigener Task. Das Zeitlimit bricht die laufende
//! Kette ab (die Future wird fallengelassen, keine Hintergrundarbeit
//! ueberlebt) und ein Panic in einem Handler toetet nur den Task, nie die
//! Verbindung.
//!
//! Genau eine Antwort pro Anfrage: das Ergebnis der Kette, ein leerer
//! `Success` wenn die Kette keines gesetzt hat, `NotFound` fuer unbekannte
//! Methoden, `Timeout` nach Fristablauf. Eine Einmal-Sperre am Kontext
//! verhindert Doppelantworten.

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tunnelwerk_protocol::{Request, Response, StatusCode};

use crate::connection::Connection;
use crate::router::Router;

// ---------------------------------------------------------------------------
// RequestKontext
// ---------------------------------------------------------------------------

/// Kontext einer laufenden Anfrage, von allen Kettenschritten geteilt
///
/// Middleware legt Daten fuer nachgelagerte Handler im Attribut-Speicher
/// ab. `ergebnis()` beendet die Kette mit Ausgang, `abbrechen()` ohne.
pub struct RequestKontext {
    anfrage: Request,
    verbindung: Arc<Connection>,
    ergebnis: Mutex<Option<(StatusCode, Value)>>,
    beendet: AtomicBool,
    gesendet: AtomicBool,
    attribute: Mutex<HashMap<String, Value>>,
}

impl RequestKontext {
    pub fn neu(anfrage: Request, verbindung: Arc<Connection>) -> Self {
        Self {
            anfrage,
            verbindung,
            ergebnis: Mutex::new(None),
            beendet: AtomicBool::new(false),
            gesendet: AtomicBool::new(false),
            attribute: Mutex::new(HashMap::new()),
        }
    }

    pub fn anfrage(&self) -> &Request {
        &self.anfrage
    }

    pub fn verbindung(&self) -> &Arc<Connection> {
        &self.verbindung
    }

    /// Deserialisiert den n-ten Parameter der Anfrage
    pub fn param<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.anfrage
            .params
            .get(index)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Setzt den Ausgang der Anfrage und beendet die Kette
    pub fn ergebnis(&self, code: StatusCode, data: impl Serialize) {
        *self.ergebnis.lock() = Some((
            code,
            serde_json::to_value(data).unwrap_or(Value::Null),
        ));
        self.beendet.store(true, Ordering::SeqCst);
    }

    /// Beendet die Kette ohne Ausgang; die Antwort wird ein leerer Success
    pub fn abbrechen(&self) {
        self.beendet.store(true, Ordering::SeqCst);
    }

    /// True sobald ein Schritt die Kette beendet hat
    pub fn ist_beendet(&self) -> bool {
        self.beendet.load(Ordering::SeqCst)
    }

    /// Legt einen Wert fuer nachgelagerte Kettenschritte ab
    pub fn attribut_setzen(&self, schluessel: impl Into<String>, wert: Value) {
        self.attribute.lock().insert(schluessel.into(), wert);
    }

    /// Liest einen von Middleware abgelegten Wert
    pub fn attribut(&self, schluessel: &str) -> Option<Value> {
        self.attribute.lock().get(schluessel).cloned()
    }

    /// Sendet die Antwort, hoechstens einmal pro Anfrage
    fn antwort_senden(&self, antwort: Response) {
        if self.gesendet.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.verbindung.antworten(&antwort) {
            tracing::warn!(
                conn = %self.verbindung.id(),
                id = %antwort.id,
                fehler = %e,
                "Antwort liess sich nicht senden"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchEngine
// ---------------------------------------------------------------------------

/// Fuehrt Anfragen gegen den unveraenderlichen Router aus
pub struct DispatchEngine {
    router: Arc<Router>,
    zeitlimit: Duration,
}

impl DispatchEngine {
    pub fn neu(router: Arc<Router>, zeitlimit: Duration) -> Self {
        Self { router, zeitlimit }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Startet die Verarbeitung einer Anfrage in einem eigenen Task
    pub fn verarbeiten(&self, verbindung: Arc<Connection>, anfrage: Request) {
        let Some(kette) = self.router.kette(&anfrage.method) else {
            tracing::debug!(
                conn = %verbindung.id(),
                methode = %anfrage.method,
                "Unbekannte Methode"
            );
            let ktx = RequestKontext::neu(anfrage, verbindung);
            let antwort = Response::antwort(
                ktx.anfrage.id.clone(),
                StatusCode::NotFound,
                format!("Unbekannte Methode: {}", ktx.anfrage.method),
            );
            ktx.antwort_senden(antwort);
            return;
        };

        let zeitlimit = self.zeitlimit;
        let ktx = Arc::new(RequestKontext::neu(anfrage, verbindung));

        tokio::spawn(async move {
            let lauf = {
                let ktx = Arc::clone(&ktx);
                async move {
                    for schritt in kette.iter() {
                        schritt(Arc::clone(&ktx)).await;
                        if ktx.ist_beendet() {
                            break;
                        }
                    }
                }
            };

            let id = ktx.anfrage.id.clone();
            let ausgang =
                tokio::time::timeout(zeitlimit, AssertUnwindSafe(lauf).catch_unwind()).await;
            let antwort = match ausgang {
                Ok(Ok(())) => match ktx.ergebnis.lock().take() {
                    Some((code, data)) => Response::antwort(id, code, data),
                    None => Response::antwort(id, StatusCode::Success, Value::Null),
                },
                Ok(Err(_panik)) => {
                    tracing::error!(
                        conn = %ktx.verbindung.id(),
                        methode = %ktx.anfrage.method,
                        "Handler-Panic abgefangen"
                    );
                    Response::antwort(id, StatusCode::ResolveFailed, "Interner Handler-Fehler")
                }
                Err(_) => {
                    tracing::warn!(
                        conn = %ktx.verbindung.id(),
                        methode = %ktx.anfrage.method,
                        "Anfrage-Zeitlimit ueberschritten"
                    );
                    Response::antwort(id, StatusCode::Timeout, "Zeitlimit ueberschritten")
                }
            };
            ktx.antwort_senden(antwort);
        });
    }
}
