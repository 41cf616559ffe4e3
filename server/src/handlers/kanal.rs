//! kanal.* – benannte Broadcast-Kanaele

use serde_json::Value;
use std::sync::Arc;

use tunnelwerk_protocol::StatusCode;
use tunnelwerk_pubsub::{PubSubError, Publisher};
use tunnelwerk_session::{handler, RouterBuilder};

use crate::handlers::middleware;
use crate::state::ServerState;

pub fn registrieren(builder: &mut RouterBuilder, state: Arc<ServerState>) {
    let abo_state = Arc::clone(&state);
    let ab_state = Arc::clone(&state);
    let sende_state = Arc::clone(&state);

    builder
        .gruppe("kanal")
        .mittel(middleware::angemeldet())
        .registrieren(
            "abonnieren",
            handler(move |ktx| {
                let state = Arc::clone(&abo_state);
                async move {
                    let Some(name) = ktx.param::<String>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Kanalname fehlt");
                        return;
                    };
                    let publisher = match state.publisher.holen(&name) {
                        Some(p) => p,
                        None => {
                            // Kanaele entstehen beim ersten Abonnement; bei einem
                            // gleichzeitigen zweiten Ersteller gewinnt die Registry.
                            let neu = Publisher::neu(name.clone());
                            match state.publisher.registrieren(Arc::clone(&neu)) {
                                Ok(()) => neu,
                                Err(_) => match state.publisher.holen(&name) {
                                    Some(p) => p,
                                    None => {
                                        ktx.ergebnis(StatusCode::Unknown, "Kanal nicht verfuegbar");
                                        return;
                                    }
                                },
                            }
                        }
                    };
                    match publisher.abonnieren(Arc::clone(ktx.verbindung())) {
                        Ok(()) => ktx.ergebnis(StatusCode::Success, &name),
                        Err(PubSubError::BereitsAbonniert(_)) => {
                            ktx.ergebnis(StatusCode::AlreadyExist, "Bereits abonniert")
                        }
                        Err(PubSubError::Geschlossen(_)) => {
                            ktx.ergebnis(StatusCode::NotFound, "Kanal geschlossen")
                        }
                        Err(e) => ktx.ergebnis(StatusCode::Unknown, e.to_string()),
                    }
                }
            }),
        )
        .registrieren(
            "abbestellen",
            handler(move |ktx| {
                let state = Arc::clone(&ab_state);
                async move {
                    let Some(name) = ktx.param::<String>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Kanalname fehlt");
                        return;
                    };
                    match state.publisher.holen(&name) {
                        Some(publisher) => {
                            publisher.abbestellen(ktx.verbindung());
                            ktx.ergebnis(StatusCode::Success, &name);
                        }
                        None => ktx.ergebnis(StatusCode::NotFound, "Unbekannter Kanal"),
                    }
                }
            }),
        )
        .registrieren(
            "senden",
            handler(move |ktx| {
                let state = Arc::clone(&sende_state);
                async move {
                    if !middleware::hat_berechtigung(&ktx, "kanal.senden") {
                        ktx.ergebnis(StatusCode::PermissionDenied, "kanal.senden fehlt");
                        return;
                    }
                    let Some(name) = ktx.param::<String>(0) else {
                        ktx.ergebnis(StatusCode::WrongData, "Kanalname fehlt");
                        return;
                    };
                    let Some(daten) = ktx.param::<Value>(1) else {
                        ktx.ergebnis(StatusCode::WrongData, "Nutzdaten fehlen");
                        return;
                    };
                    match state.publisher.holen(&name) {
                        Some(publisher) => {
                            publisher.nachricht(daten, Some(ktx.verbindung()));
                            ktx.ergebnis(StatusCode::Success, &name);
                        }
                        None => ktx.ergebnis(StatusCode::NotFound, "Unbekannter Kanal"),
                    }
                }
            }),
        );
}
