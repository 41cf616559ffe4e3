//! raum.* – Raum-Lebenszyklus und Raum-Broadcast

use serde_json::{json, Value};
use std::sync::Arc;

use tunnelwerk_core::RaumId;
use tunnelwerk_protocol::StatusCode;
use tunnelwerk_rooms::{RaumError, RaumKonfig};
use tunnelwerk_session::{handler, RequestKontext, RouterBuilder};
use tunnelwerk_tunnel::TunnelError;

use crate::handlers::middleware;
use crate::state::ServerState;

pub fn registrieren(builder: &mut RouterBuilder, state: Arc<ServerState>) {
    let erstellen_state = Arc::clone(&state);
    let beitreten_state = Arc::clone(&state);
    let verlassen_state = Arc::clone(&state);
    let schliessen_state = Arc::clone(&state);
    let sperren_state = Arc::clone(&state);
    let nachricht_state = Arc::clone(&state);
    let mitglieder_state = Arc::clone(&state);

    builder
        .gruppe("raum")
        .mittel(middleware::angemeldet())
        .registrieren(
            "erstellen",
            handler(move |ktx| {
                let state = Arc::clone(&erstellen_state);
                async move {
                    let Some(konfig) = ktx.param::<RaumKonfig>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raumkonfiguration fehlt");
                        return;
                    };
                    let Some(schluessel) = ktx.param::<String>(1) else {
                        ktx.ergebnis(StatusCode::WrongData, "Peer-Schluessel fehlt");
                        return;
                    };
                    let port = ktx.param::<u16>(2).unwrap_or(0);

                    match state
                        .raeume
                        .neuer_raum(Arc::clone(ktx.verbindung()), konfig, &schluessel, port)
                        .await
                    {
                        Ok((raum, mitglieder)) => ktx.ergebnis(
                            StatusCode::Success,
                            json!({
                                "raumId": raum.id().inner(),
                                "beitrittsToken": raum.beitritts_token(),
                                "mitglieder": mitglieder,
                            }),
                        ),
                        Err(e) => fehler_antworten(&ktx, e),
                    }
                }
            }),
        )
        .registrieren(
            "beitreten",
            handler(move |ktx| {
                let state = Arc::clone(&beitreten_state);
                async move {
                    let Some(token) = ktx.param::<String>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Beitritts-Token fehlt");
                        return;
                    };
                    let Some(schluessel) = ktx.param::<String>(1) else {
                        ktx.ergebnis(StatusCode::WrongData, "Peer-Schluessel fehlt");
                        return;
                    };
                    let port = ktx.param::<u16>(2).unwrap_or(0);
                    let passwort = ktx.param::<String>(3);

                    match state
                        .raeume
                        .beitreten(
                            &token,
                            Arc::clone(ktx.verbindung()),
                            &schluessel,
                            port,
                            passwort.as_deref(),
                        )
                        .await
                    {
                        Ok((raum, mitglieder)) => ktx.ergebnis(
                            StatusCode::Success,
                            json!({
                                "raumId": raum.id().inner(),
                                "mitglieder": mitglieder,
                            }),
                        ),
                        Err(e) => fehler_antworten(&ktx, e),
                    }
                }
            }),
        )
        .registrieren(
            "verlassen",
            handler(move |ktx| {
                let state = Arc::clone(&verlassen_state);
                async move {
                    let Some(raum_id) = ktx.param::<RaumId>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raum-Id fehlt");
                        return;
                    };
                    match state.raeume.verlassen(raum_id, ktx.verbindung().id()) {
                        Ok(()) => ktx.ergebnis(StatusCode::Success, raum_id.inner()),
                        Err(e) => fehler_antworten(&ktx, e),
                    }
                }
            }),
        )
        .registrieren(
            "schliessen",
            handler(move |ktx| {
                let state = Arc::clone(&schliessen_state);
                async move {
                    let Some(raum_id) = ktx.param::<RaumId>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raum-Id fehlt");
                        return;
                    };
                    let Some(raum) = state.raeume.holen(raum_id) else {
                        ktx.ergebnis(StatusCode::NotFound, "Unbekannter Raum");
                        return;
                    };
                    // Schliessen darf nur der Besitzer
                    if raum.besitzer() != Some(ktx.verbindung().id()) {
                        ktx.ergebnis(StatusCode::PermissionDenied, "Nur der Besitzer");
                        return;
                    }
                    match state.raeume.schliessen(raum_id) {
                        Ok(()) => ktx.ergebnis(StatusCode::Success, raum_id.inner()),
                        Err(e) => fehler_antworten(&ktx, e),
                    }
                }
            }),
        )
        .registrieren(
            "sperren",
            handler(move |ktx| {
                let state = Arc::clone(&sperren_state);
                async move {
                    let Some(raum_id) = ktx.param::<RaumId>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raum-Id fehlt");
                        return;
                    };
                    let gesperrt = ktx.param::<bool>(1).unwrap_or(true);
                    let Some(raum) = state.raeume.holen(raum_id) else {
                        ktx.ergebnis(StatusCode::NotFound, "Unbekannter Raum");
                        return;
                    };
                    if raum.besitzer() != Some(ktx.verbindung().id()) {
                        ktx.ergebnis(StatusCode::PermissionDenied, "Nur der Besitzer");
                        return;
                    }
                    raum.sperren(gesperrt);
                    ktx.ergebnis(StatusCode::Success, gesperrt);
                }
            }),
        )
        .registrieren(
            "nachricht",
            handler(move |ktx| {
                let state = Arc::clone(&nachricht_state);
                async move {
                    let Some(raum_id) = ktx.param::<RaumId>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raum-Id fehlt");
                        return;
                    };
                    let Some(daten) = ktx.param::<Value>(1) else {
                        ktx.ergebnis(StatusCode::WrongData, "Nutzdaten fehlen");
                        return;
                    };
                    let Some(raum) = state.raeume.holen(raum_id) else {
                        ktx.ergebnis(StatusCode::NotFound, "Unbekannter Raum");
                        return;
                    };
                    match raum.nachricht(daten, ktx.verbindung()) {
                        Ok(()) => ktx.ergebnis(StatusCode::Success, raum_id.inner()),
                        Err(e) => fehler_antworten(&ktx, e),
                    }
                }
            }),
        )
        .registrieren(
            "mitglieder",
            handler(move |ktx| {
                let state = Arc::clone(&mitglieder_state);
                async move {
                    let Some(raum_id) = ktx.param::<RaumId>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Raum-Id fehlt");
                        return;
                    };
                    let Some(raum) = state.raeume.holen(raum_id) else {
                        ktx.ergebnis(StatusCode::NotFound, "Unbekannter Raum");
                        return;
                    };
                    // Mitgliederliste sehen nur Mitglieder
                    if !raum.ist_mitglied(ktx.verbindung().id()) {
                        ktx.ergebnis(StatusCode::Forbidden, "Kein Mitglied");
                        return;
                    }
                    ktx.ergebnis(StatusCode::Success, raum.mitglieder());
                }
            }),
        );
}

/// Bildet Raum- und Tunnelfehler auf Statuscodes ab
fn fehler_antworten(ktx: &RequestKontext, fehler: RaumError) {
    let code = match &fehler {
        RaumError::Verboten | RaumError::AufSperrliste(_) | RaumError::KeinMitglied
        | RaumError::Voll => StatusCode::Forbidden,
        RaumError::FalschesPasswort => StatusCode::WrongData,
        RaumError::NichtGefunden(_) | RaumError::UnbekanntesToken | RaumError::Geschlossen => {
            StatusCode::NotFound
        }
        RaumError::Tunnel(TunnelError::UngueltigerSchluessel(_)) => StatusCode::WrongData,
        RaumError::Tunnel(TunnelError::PeerExistiert(_)) => StatusCode::AlreadyExist,
        RaumError::Tunnel(TunnelError::VlanErschoepft) => StatusCode::TooManyRequests,
        RaumError::Tunnel(_) => StatusCode::Unknown,
    };
    ktx.ergebnis(code, fehler.to_string());
}
