//! Gruppen-Middleware: Anmelde- und Berechtigungspruefung

use tunnelwerk_protocol::StatusCode;
use tunnelwerk_session::{handler, Handler, RequestKontext};

/// Weist unangemeldete oder abgelaufene Verbindungen ab
pub fn angemeldet() -> Handler {
    handler(|ktx| async move {
        if !ktx.verbindung().ist_angemeldet() {
            ktx.ergebnis(StatusCode::NoToken, "Nicht angemeldet");
        }
    })
}

/// Kettenschritt, der eine bestimmte Berechtigung verlangt
pub fn berechtigung(name: &'static str) -> Handler {
    handler(move |ktx| async move {
        if !hat_berechtigung(&ktx, name) {
            ktx.ergebnis(
                StatusCode::PermissionDenied,
                format!("Berechtigung fehlt: {name}"),
            );
        }
    })
}

/// Prueft eine Berechtigung der Auth-Projektion
pub fn hat_berechtigung(ktx: &RequestKontext, name: &str) -> bool {
    ktx.verbindung()
        .auth()
        .map(|a| a.hat_berechtigung(name))
        .unwrap_or(false)
}
