//! End-to-End-Tests der RPC-Schicht ohne TCP
//!
//! Baut den echten Router samt Zustand auf und schiebt Anfragen direkt
//! durch die DispatchEngine. Antworten und Push-Nachrichten werden aus
//! der Ausgangs-Queue der Verbindung gelesen.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use tunnelwerk_auth::{MemorySperrListe, MemoryTokenDienst};
use tunnelwerk_core::UserId;
use tunnelwerk_protocol::{Frame, Response, StatusCode};
use tunnelwerk_pubsub::PublisherRegistry;
use tunnelwerk_rooms::RaumVerwaltung;
use tunnelwerk_server::config::ServerConfig;
use tunnelwerk_server::handlers;
use tunnelwerk_server::state::ServerState;
use tunnelwerk_session::{
    Connection, ConnectionRegistry, DispatchEngine, VerbindungsKanaele,
};
use tunnelwerk_tunnel::{MemoryGeraet, TunnelAdapter};

struct Umgebung {
    state: Arc<ServerState>,
    engine: Arc<DispatchEngine>,
    dienst: Arc<MemoryTokenDienst>,
    sperrliste: Arc<MemorySperrListe>,
}

fn umgebung() -> Umgebung {
    let geraet = Arc::new(MemoryGeraet::neu());
    let tunnel = Arc::new(TunnelAdapter::neu(geraet, 51820));
    tunnel.starten().unwrap();

    let dienst = Arc::new(MemoryTokenDienst::neu());
    let sperrliste = Arc::new(MemorySperrListe::neu());
    let state = Arc::new(ServerState {
        config: ServerConfig::default(),
        verbindungen: Arc::new(ConnectionRegistry::neu()),
        publisher: Arc::new(PublisherRegistry::neu()),
        raeume: RaumVerwaltung::neu(Arc::clone(&tunnel), Duration::from_secs(1800)),
        tunnel,
        token_pruefer: Arc::clone(&dienst) as _,
        berechtigungen: Arc::clone(&dienst) as _,
        sperrliste: Arc::clone(&sperrliste) as _,
    });
    let router = handlers::router_bauen(&state).unwrap();
    let engine = Arc::new(DispatchEngine::neu(
        Arc::new(router),
        Duration::from_secs(5),
    ));
    Umgebung {
        state,
        engine,
        dienst,
        sperrliste,
    }
}

fn verbinden(umg: &Umgebung) -> (Arc<Connection>, VerbindungsKanaele) {
    let (conn, kanaele) = Connection::neu("127.0.0.1:4000".parse().unwrap(), 64);
    umg.state.verbindungen.registrieren(Arc::clone(&conn));
    (conn, kanaele)
}

fn peer_schluessel() -> String {
    STANDARD.encode([7u8; 32])
}

/// Naechste Nachricht aus der Ausgangs-Queue
async fn nachricht_lesen(kanaele: &mut VerbindungsKanaele) -> Response {
    let frame = tokio::time::timeout(Duration::from_secs(2), kanaele.ausgang.recv())
        .await
        .expect("keine Nachricht innerhalb der Frist")
        .expect("Ausgangs-Queue geschlossen");
    match frame {
        Frame::Data(bytes) => serde_json::from_slice(&bytes).unwrap(),
        andere => panic!("Data-Frame erwartet, war {:?}", andere),
    }
}

/// Fuehrt eine Anfrage aus und wartet auf das zugehoerige Reply
async fn anfrage(
    umg: &Umgebung,
    conn: &Arc<Connection>,
    kanaele: &mut VerbindungsKanaele,
    id: &str,
    method: &str,
    params: Vec<Value>,
) -> Response {
    umg.engine.verarbeiten(
        Arc::clone(conn),
        tunnelwerk_protocol::Request::neu(id, method, params),
    );
    loop {
        let antwort = nachricht_lesen(kanaele).await;
        if antwort.method == "reply" && antwort.id == id {
            return antwort;
        }
    }
}

async fn anmelden(
    umg: &Umgebung,
    conn: &Arc<Connection>,
    kanaele: &mut VerbindungsKanaele,
    name: &str,
    permissions: Vec<String>,
) -> UserId {
    let uid = UserId::new();
    let token = umg
        .dienst
        .ausgeben(uid, name, permissions, chrono::Duration::hours(1));
    let antwort = anfrage(umg, conn, kanaele, "auth", "system.auth", vec![json!(token)]).await;
    assert_eq!(antwort.status_code, StatusCode::Success);
    uid
}

#[tokio::test]
async fn system_methoden_ohne_anmeldung() {
    let umg = umgebung();
    let (conn, mut kanaele) = verbinden(&umg);

    let pong = anfrage(&umg, &conn, &mut kanaele, "1", "system.ping", vec![]).await;
    assert_eq!(pong.status_code, StatusCode::Success);
    assert_eq!(pong.data, json!("pong"));

    let echo = anfrage(&umg, &conn, &mut kanaele, "2", "system.ping", vec![json!(41)]).await;
    assert_eq!(echo.data, json!(41));

    let zeit = anfrage(&umg, &conn, &mut kanaele, "3", "system.zeit", vec![]).await;
    assert!(zeit.data.as_i64().unwrap() > 0);

    let schluessel = anfrage(&umg, &conn, &mut kanaele, "4", "system.schluessel", vec![]).await;
    assert_eq!(schluessel.status_code, StatusCode::Success);
    let dekodiert = STANDARD.decode(schluessel.data.as_str().unwrap()).unwrap();
    assert_eq!(dekodiert.len(), 32);
}

#[tokio::test]
async fn unbekannte_methode_und_fehlende_anmeldung() {
    let umg = umgebung();
    let (conn, mut kanaele) = verbinden(&umg);

    let weg = anfrage(&umg, &conn, &mut kanaele, "1", "gibt.es.nicht", vec![]).await;
    assert_eq!(weg.status_code, StatusCode::NotFound);

    let zu = anfrage(&umg, &conn, &mut kanaele, "2", "raum.erstellen", vec![]).await;
    assert_eq!(zu.status_code, StatusCode::NoToken);
}

#[tokio::test]
async fn auth_prueft_token_und_sperrliste() {
    let umg = umgebung();
    let (conn, mut kanaele) = verbinden(&umg);

    let ohne = anfrage(&umg, &conn, &mut kanaele, "1", "system.auth", vec![]).await;
    assert_eq!(ohne.status_code, StatusCode::NoToken);

    let falsch = anfrage(
        &umg,
        &conn,
        &mut kanaele,
        "2",
        "system.auth",
        vec![json!("erfunden")],
    )
    .await;
    assert_eq!(falsch.status_code, StatusCode::WrongToken);

    let token = umg.dienst.ausgeben(
        UserId::new(),
        "sven",
        vec![],
        chrono::Duration::hours(1),
    );
    umg.sperrliste.sperren(token.clone());
    let gesperrt = anfrage(
        &umg,
        &conn,
        &mut kanaele,
        "3",
        "system.auth",
        vec![json!(token)],
    )
    .await;
    assert_eq!(gesperrt.status_code, StatusCode::BlackToken);
    assert!(!conn.ist_angemeldet());
}

#[tokio::test]
async fn abmelden_gibt_benutzer_frei() {
    let umg = umgebung();
    let (conn, mut kanaele) = verbinden(&umg);
    let uid = anmelden(&umg, &conn, &mut kanaele, "frida", vec![]).await;
    assert!(umg.state.verbindungen.benutzer_verbindung(uid).is_some());

    let ab = anfrage(&umg, &conn, &mut kanaele, "1", "system.abmelden", vec![]).await;
    assert_eq!(ab.status_code, StatusCode::Success);
    assert!(!conn.ist_angemeldet());
    assert!(umg.state.verbindungen.benutzer_verbindung(uid).is_none());

    // Geschuetzte Methoden sind danach wieder zu
    let zu = anfrage(&umg, &conn, &mut kanaele, "2", "raum.erstellen", vec![]).await;
    assert_eq!(zu.status_code, StatusCode::NoToken);
}

#[tokio::test]
async fn doppelte_anmeldung_verdraengt_alte_verbindung() {
    let umg = umgebung();
    let (alt, mut alt_kanaele) = verbinden(&umg);
    let (neu, mut neu_kanaele) = verbinden(&umg);

    let uid = UserId::new();
    let token = umg
        .dienst
        .ausgeben(uid, "mara", vec![], chrono::Duration::hours(1));

    let erste = anfrage(
        &umg,
        &alt,
        &mut alt_kanaele,
        "1",
        "system.auth",
        vec![json!(token)],
    )
    .await;
    assert_eq!(erste.status_code, StatusCode::Success);
    assert_eq!(erste.data["username"], json!("mara"));

    let zweite = anfrage(
        &umg,
        &neu,
        &mut neu_kanaele,
        "2",
        "system.auth",
        vec![json!(token)],
    )
    .await;
    assert_eq!(zweite.status_code, StatusCode::Success);

    // Die alte Verbindung bekommt die DuplicateAuth-Notiz und wird getrennt
    let notiz = nachricht_lesen(&mut alt_kanaele).await;
    assert_eq!(notiz.status_code, StatusCode::DuplicateAuth);
    assert!(alt.ist_getrennt());

    let inhaber = umg.state.verbindungen.benutzer_verbindung(uid).unwrap();
    assert_eq!(inhaber.id(), neu.id());
}

#[tokio::test]
async fn raum_lebenszyklus_uebers_rpc() {
    let umg = umgebung();
    let (besitzer, mut bk) = verbinden(&umg);
    let (gast, mut gk) = verbinden(&umg);
    anmelden(&umg, &besitzer, &mut bk, "olaf", vec![]).await;
    anmelden(&umg, &gast, &mut gk, "gerd", vec![]).await;

    let erstellt = anfrage(
        &umg,
        &besitzer,
        &mut bk,
        "1",
        "raum.erstellen",
        vec![json!({"titel": "werkstatt"}), json!(peer_schluessel()), json!(42000)],
    )
    .await;
    assert_eq!(erstellt.status_code, StatusCode::Success);
    let token = erstellt.data["beitrittsToken"].as_str().unwrap().to_string();
    let raum_id = erstellt.data["raumId"].clone();

    let beigetreten = anfrage(
        &umg,
        &gast,
        &mut gk,
        "2",
        "raum.beitreten",
        vec![json!(token), json!(STANDARD.encode([9u8; 32])), json!(42001)],
    )
    .await;
    assert_eq!(beigetreten.status_code, StatusCode::Success);
    assert_eq!(beigetreten.data["mitglieder"].as_array().unwrap().len(), 2);

    // Der Besitzer sieht die Beitritts-Notiz als Push
    let push = nachricht_lesen(&mut bk).await;
    assert!(push.method.starts_with("publish.raum."));

    let gesendet = anfrage(
        &umg,
        &gast,
        &mut gk,
        "3",
        "raum.nachricht",
        vec![raum_id.clone(), json!({"text": "hallo"})],
    )
    .await;
    assert_eq!(gesendet.status_code, StatusCode::Success);
    let empfangen = nachricht_lesen(&mut bk).await;
    assert_eq!(empfangen.data["ereignis"], json!("nachricht"));
    assert_eq!(empfangen.data["daten"]["data"], json!({"text": "hallo"}));

    // Schliessen darf nur der Besitzer
    let verboten = anfrage(&umg, &gast, &mut gk, "4", "raum.schliessen", vec![raum_id.clone()]).await;
    assert_eq!(verboten.status_code, StatusCode::PermissionDenied);

    let zu = anfrage(&umg, &besitzer, &mut bk, "5", "raum.schliessen", vec![raum_id]).await;
    assert_eq!(zu.status_code, StatusCode::Success);
    assert_eq!(umg.state.raeume.anzahl(), 0);
}

#[tokio::test]
async fn kanal_abonnieren_und_senden() {
    let umg = umgebung();
    let (sender, mut sk) = verbinden(&umg);
    let (hoerer, mut hk) = verbinden(&umg);
    anmelden(&umg, &sender, &mut sk, "anna", vec!["kanal.senden".into()]).await;
    anmelden(&umg, &hoerer, &mut hk, "bert", vec![]).await;

    // Der erste Abonnent legt den Kanal an
    let abo1 = anfrage(&umg, &sender, &mut sk, "1", "kanal.abonnieren", vec![json!("wetter")]).await;
    assert_eq!(abo1.status_code, StatusCode::Success);
    let abo2 = anfrage(&umg, &hoerer, &mut hk, "2", "kanal.abonnieren", vec![json!("wetter")]).await;
    assert_eq!(abo2.status_code, StatusCode::Success);

    let doppelt = anfrage(&umg, &hoerer, &mut hk, "3", "kanal.abonnieren", vec![json!("wetter")]).await;
    assert_eq!(doppelt.status_code, StatusCode::AlreadyExist);

    // Ohne Berechtigung kein Senden
    let verboten = anfrage(
        &umg,
        &hoerer,
        &mut hk,
        "4",
        "kanal.senden",
        vec![json!("wetter"), json!("regen")],
    )
    .await;
    assert_eq!(verboten.status_code, StatusCode::PermissionDenied);

    let gesendet = anfrage(
        &umg,
        &sender,
        &mut sk,
        "5",
        "kanal.senden",
        vec![json!("wetter"), json!("sonne")],
    )
    .await;
    assert_eq!(gesendet.status_code, StatusCode::Success);

    let empfangen = nachricht_lesen(&mut hk).await;
    assert_eq!(empfangen.method, "publish.wetter");
    assert_eq!(empfangen.data["data"], json!("sonne"));
    assert_eq!(empfangen.data["senderName"], json!("anna"));

    let weg = anfrage(&umg, &hoerer, &mut hk, "6", "kanal.abbestellen", vec![json!("wetter")]).await;
    assert_eq!(weg.status_code, StatusCode::Success);
}
