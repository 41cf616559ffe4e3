//! system.* – Basismethoden und Anmeldung

use serde_json::{json, Value};
use std::sync::Arc;

use tunnelwerk_protocol::{Response, StatusCode};
use tunnelwerk_session::{handler, RequestKontext, RouterBuilder};

use crate::state::ServerState;

pub fn registrieren(builder: &mut RouterBuilder, state: Arc<ServerState>) {
    let schluessel_state = Arc::clone(&state);
    let auth_state = Arc::clone(&state);
    let abmelde_state = Arc::clone(&state);

    builder
        .gruppe("system")
        .registrieren(
            "ping",
            handler(|ktx| async move {
                let echo: Value = ktx.param(0).unwrap_or_else(|| json!("pong"));
                ktx.ergebnis(StatusCode::Success, echo);
            }),
        )
        .registrieren(
            "zeit",
            handler(|ktx| async move {
                ktx.ergebnis(StatusCode::Success, chrono::Utc::now().timestamp_millis());
            }),
        )
        .registrieren(
            "verbindung",
            handler(|ktx| async move {
                ktx.ergebnis(StatusCode::Success, ktx.verbindung().id().inner());
            }),
        )
        .registrieren(
            "schluessel",
            handler(move |ktx| {
                let state = Arc::clone(&schluessel_state);
                async move {
                    match state.tunnel.oeffentlicher_schluessel() {
                        Ok(schluessel) => ktx.ergebnis(StatusCode::Success, schluessel),
                        Err(e) => ktx.ergebnis(StatusCode::Unknown, e.to_string()),
                    }
                }
            }),
        )
        .registrieren(
            "auth",
            handler(move |ktx| {
                let state = Arc::clone(&auth_state);
                async move { auth_ausfuehren(ktx, state).await }
            }),
        )
        .registrieren(
            "abmelden",
            handler(move |ktx| {
                let state = Arc::clone(&abmelde_state);
                async move {
                    let conn = ktx.verbindung();
                    if let Some(anspruch) = conn.auth() {
                        state.verbindungen.benutzer_freigeben(anspruch.user_id, conn.id());
                        conn.abbau_hook_entfernen("auth.benutzer");
                        conn.auth_loeschen();
                        tracing::info!(conn = %conn.id(), benutzer = %anspruch.user_id, "Abgemeldet");
                    }
                    ktx.ergebnis(StatusCode::Success, Value::Null);
                }
            }),
        );
}

/// `system.auth(token, geraet?)` – Anmeldung einer Verbindung
///
/// Reihenfolge: Sperrliste, Token-Pruefung, Berechtigungs-Lookup, dann
/// Benutzer-Eindeutigkeit. Eine zweite Anmeldung desselben Benutzers
/// verdraengt die aeltere Verbindung (DuplicateAuth an die alte Seite).
async fn auth_ausfuehren(ktx: Arc<RequestKontext>, state: Arc<ServerState>) {
    let Some(token) = ktx.param::<String>(0) else {
        ktx.ergebnis(StatusCode::NoToken, "Token fehlt");
        return;
    };
    let geraet: Option<String> = ktx.param(1);

    if state.sperrliste.ist_gesperrt(&token).await {
        ktx.ergebnis(StatusCode::BlackToken, "Token gesperrt");
        return;
    }

    let mut anspruch = match state.token_pruefer.pruefen(&token).await {
        Ok(anspruch) => anspruch,
        Err(e) => {
            tracing::debug!(conn = %ktx.verbindung().id(), fehler = %e, "Anmeldung abgelehnt");
            ktx.ergebnis(StatusCode::WrongToken, e.to_string());
            return;
        }
    };

    // Berechtigungen frisch aus der Quelle nachladen
    for berechtigung in state.berechtigungen.berechtigungen(anspruch.user_id).await {
        if !anspruch.permissions.contains(&berechtigung) {
            anspruch.permissions.push(berechtigung);
        }
    }

    let conn = Arc::clone(ktx.verbindung());
    if let Some(geraet) = geraet {
        conn.geraet_setzen(geraet);
    }

    // Pro Benutzer hoechstens eine angemeldete Verbindung
    if let Some(alte) = state
        .verbindungen
        .benutzer_beanspruchen(anspruch.user_id, conn.id())
    {
        tracing::info!(
            benutzer = %anspruch.user_id,
            alte = %alte.id(),
            neue = %conn.id(),
            "Doppelte Anmeldung, alte Verbindung wird getrennt"
        );
        let notiz = Response::antwort(
            String::new(),
            StatusCode::DuplicateAuth,
            "Anmeldung von anderer Verbindung",
        );
        let _ = alte.antworten(&notiz);
        alte.trennen("Doppelte Anmeldung");
    }

    let registry = Arc::clone(&state.verbindungen);
    let user_id = anspruch.user_id;
    let conn_id = conn.id();
    conn.abbau_hook_setzen(
        "auth.benutzer",
        Box::new(move || registry.benutzer_freigeben(user_id, conn_id)),
    );
    conn.auth_setzen(anspruch.clone());

    tracing::info!(conn = %conn_id, benutzer = %user_id, name = %anspruch.username, "Angemeldet");
    ktx.ergebnis(
        StatusCode::Success,
        json!({
            "userId": anspruch.user_id.inner(),
            "username": anspruch.username,
            "permissions": anspruch.permissions,
            "ablauf": anspruch.ablauf.timestamp_millis(),
        }),
    );
}
