//! Verbindungs-Task – Lese-Schleife, Writer, Heartbeat, Lebensdauer
//!
//! Pro angenommener TCP-Verbindung laeuft `VerbindungsTreiber::verarbeiten`
//! in einem eigenen tokio-Task. Drei nebenlaeufige Taetigkeiten teilen sich
//! die Verbindung:
//!
//! 1. Lese-Schleife: dekodiert Frames, beantwortet Ping sofort, reiht
//!    Requests und Heartbeat-Acks in die begrenzten Queues ein.
//! 2. Dispatch-Schleife: zieht Requests und startet pro Anfrage einen
//!    Task in der Engine.
//! 3. Heartbeat-Treiber: sendet periodisch Ping und trennt, wenn im
//!    Ack-Fenster keine Antwort eintrifft.
//!
//! Alle Abbau-Pfade laufen in `Connection::trennen` zusammen.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

use tunnelwerk_core::ConnId;
use tunnelwerk_protocol::{Frame, FrameCodec, Request, Response, StatusCode};

use crate::connection::{Connection, VerbindungsKanaele};
use crate::dispatch::DispatchEngine;
use crate::error::SessionError;
use crate::registry::ConnectionRegistry;

// ---------------------------------------------------------------------------
// Einstellungen
// ---------------------------------------------------------------------------

/// Laufzeit-Einstellungen einer Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsEinstellungen {
    /// Abstand zwischen zwei Heartbeat-Pings
    pub herzschlag_intervall: Duration,
    /// Fenster, in dem ein Ack eintreffen muss
    pub ack_fenster: Duration,
    /// Maximales Verbindungsalter
    pub lebensdauer: Duration,
    /// Tiefe der drei Verbindungs-Queues
    pub queue_tiefe: usize,
    /// Maximale Frame-Groesse auf dem Draht
    pub max_frame_groesse: usize,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            herzschlag_intervall: Duration::from_secs(30),
            ack_fenster: Duration::from_secs(10),
            lebensdauer: Duration::from_secs(60 * 60 * 24),
            queue_tiefe: 64,
            max_frame_groesse: tunnelwerk_protocol::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsTreiber
// ---------------------------------------------------------------------------

/// Faehrt eine angenommene TCP-Verbindung bis zu ihrem Ende
pub struct VerbindungsTreiber {
    engine: Arc<DispatchEngine>,
    registry: Arc<ConnectionRegistry>,
    einstellungen: VerbindungsEinstellungen,
}

impl VerbindungsTreiber {
    pub fn neu(
        engine: Arc<DispatchEngine>,
        registry: Arc<ConnectionRegistry>,
        einstellungen: VerbindungsEinstellungen,
    ) -> Self {
        Self {
            engine,
            registry,
            einstellungen,
        }
    }

    /// Verarbeitet eine Verbindung bis zum Teardown
    ///
    /// Laeuft im Verbindungs-Task; kehrt erst zurueck, wenn die Verbindung
    /// getrennt und aus der Registry entfernt ist.
    pub async fn verarbeiten(
        &self,
        stream: TcpStream,
        adresse: SocketAddr,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let (conn, kanaele) = Connection::neu(adresse, self.einstellungen.queue_tiefe);
        let conn_id = conn.id();
        self.registry.registrieren(Arc::clone(&conn));
        tracing::info!(conn = %conn_id, peer = %adresse, "Neue Verbindung");

        let VerbindungsKanaele {
            ausgang,
            eingang,
            acks,
        } = kanaele;

        let codec = FrameCodec::with_max_size(self.einstellungen.max_frame_groesse);
        let framed = Framed::new(stream, codec);
        let (sink, mut quelle) = framed.split();

        // Writer-Task besitzt den Sink; endet nach einem Close-Frame
        let schreiber = tokio::spawn(schreib_schleife(sink, ausgang));

        // Dispatch-Schleife zieht Requests aus der Eingangs-Queue
        let dispatcher = {
            let engine = Arc::clone(&self.engine);
            let conn = Arc::clone(&conn);
            let mut eingang = eingang;
            tokio::spawn(async move {
                while let Some(anfrage) = eingang.recv().await {
                    engine.verarbeiten(Arc::clone(&conn), anfrage);
                }
            })
        };

        // Heartbeat-Treiber
        let herz = tokio::spawn(herzschlag_schleife(
            Arc::clone(&conn),
            acks,
            self.einstellungen.herzschlag_intervall,
            self.einstellungen.ack_fenster,
        ));

        // Lese-Schleife im eigenen Task-Kontext
        let mut getrennt_rx = conn.getrennt_beobachten();
        let lebensende = tokio::time::sleep(self.einstellungen.lebensdauer);
        tokio::pin!(lebensende);

        loop {
            tokio::select! {
                frame = quelle.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            if !frame_verarbeiten(&conn, frame).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(conn = %conn_id, fehler = %e, "Frame-Lesefehler");
                            conn.trennen("Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(conn = %conn_id, "Verbindung vom Client beendet");
                            conn.trennen("Verbindungsende");
                            break;
                        }
                    }
                }

                _ = getrennt_rx.changed() => {
                    break;
                }

                _ = &mut lebensende => {
                    tracing::info!(conn = %conn_id, "Maximale Lebensdauer erreicht");
                    conn.trennen("Lebensdauer erreicht");
                    break;
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        conn.trennen("Server-Shutdown");
                        break;
                    }
                }
            }
        }

        conn.trennen("Verbindungs-Task endet");
        herz.abort();
        dispatcher.abort();

        // Dem Writer Zeit geben, das Close-Frame loszuwerden
        schreiber_beenden(schreiber, conn_id).await;

        self.registry.entfernen(conn_id);
        tracing::info!(conn = %conn_id, "Verbindung abgebaut");
    }
}

// ---------------------------------------------------------------------------
// Teil-Schleifen
// ---------------------------------------------------------------------------

/// Wartet auf das Writer-Ende; nach Ablauf der Frist wird der Task
/// abgebrochen statt losgeloest weiterzulaufen
async fn schreiber_beenden(mut schreiber: tokio::task::JoinHandle<()>, conn_id: ConnId) {
    if tokio::time::timeout(Duration::from_secs(5), &mut schreiber)
        .await
        .is_err()
    {
        schreiber.abort();
        let _ = schreiber.await;
        tracing::debug!(conn = %conn_id, "Writer nach Frist abgebrochen");
    }
}

async fn schreib_schleife<S>(mut sink: S, mut ausgang: tokio::sync::mpsc::Receiver<Frame>)
where
    S: futures_util::Sink<Frame> + Unpin,
    <S as futures_util::Sink<Frame>>::Error: std::fmt::Display,
{
    while let Some(frame) = ausgang.recv().await {
        let ist_close = matches!(frame, Frame::Close);
        if let Err(e) = sink.send(frame).await {
            tracing::debug!(fehler = %e, "Senden fehlgeschlagen, Writer endet");
            break;
        }
        if ist_close {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Sendet periodisch Ping und erwartet ein Ack im Fenster
///
/// Acks ausserhalb des Fensters werden vor dem naechsten Ping verworfen.
/// Bleibt das Ack aus, wird die Verbindung getrennt.
async fn herzschlag_schleife(
    conn: Arc<Connection>,
    mut acks: tokio::sync::mpsc::Receiver<u8>,
    intervall: Duration,
    ack_fenster: Duration,
) {
    let mut takt = tokio::time::interval(intervall);
    takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    takt.tick().await; // erster Tick feuert sofort

    let mut seq: u8 = 0;
    loop {
        takt.tick().await;
        if conn.ist_getrennt() {
            return;
        }

        // Veraltete Acks aus frueheren Fenstern verwerfen
        while acks.try_recv().is_ok() {}

        seq = seq.wrapping_add(1);
        if conn.senden(Frame::Ping(seq)).is_err() {
            tracing::debug!(conn = %conn.id(), "Ping liess sich nicht einreihen");
            return;
        }

        match tokio::time::timeout(ack_fenster, acks.recv()).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(_) => {
                tracing::warn!(conn = %conn.id(), "Heartbeat-Ack ausgeblieben");
                conn.trennen("Heartbeat verpasst");
                return;
            }
        }
    }
}

/// Verarbeitet einen gelesenen Frame; false beendet die Lese-Schleife
async fn frame_verarbeiten(conn: &Arc<Connection>, frame: Frame) -> bool {
    match frame {
        Frame::Ping(b) => {
            let _ = conn.senden(Frame::Pong(b));
            true
        }
        Frame::Pong(b) => {
            if let Err(e) = conn.ack_einreihen(b).await {
                tracing::debug!(conn = %conn.id(), fehler = %e, "Ack verworfen");
            }
            true
        }
        Frame::Close => {
            conn.trennen("Close vom Client");
            false
        }
        Frame::Data(bytes) => {
            let anfrage: Request = match serde_json::from_slice(&bytes) {
                Ok(anfrage) => anfrage,
                Err(e) => {
                    // Kaputtes JSON trennt nicht, der Client bekommt WrongBody
                    tracing::debug!(conn = %conn.id(), fehler = %e, "Unlesbare Anfrage");
                    let antwort = Response::antwort(
                        String::new(),
                        StatusCode::WrongBody,
                        "Anfrage nicht lesbar",
                    );
                    let _ = conn.antworten(&antwort);
                    return true;
                }
            };

            // Datenpfad-Heartbeat fuer Clients ohne Pong-Frames
            if anfrage.method == "heartbeat" {
                let _ = conn.ack_einreihen(0).await;
                let antwort =
                    Response::antwort(anfrage.id, StatusCode::Success, serde_json::Value::Null);
                let _ = conn.antworten(&antwort);
                return true;
            }

            let id = anfrage.id.clone();
            match conn.eingang_einreihen(anfrage).await {
                Ok(()) => {}
                Err(SessionError::Ueberlastet) => {
                    tracing::warn!(conn = %conn.id(), "Eingangs-Queue ueberlastet");
                    let antwort = Response::antwort(
                        id,
                        StatusCode::TooManyRequests,
                        "Server ueberlastet, spaeter erneut versuchen",
                    );
                    let _ = conn.antworten(&antwort);
                }
                Err(_) => return false,
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{handler, RouterBuilder};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn test_server(
        einstellungen: VerbindungsEinstellungen,
    ) -> (SocketAddr, Arc<ConnectionRegistry>, watch::Sender<bool>) {
        let mut builder = RouterBuilder::neu();
        builder.registrieren(
            "echo",
            handler(|ktx| async move {
                let wert: Value = ktx.param(0).unwrap_or(Value::Null);
                ktx.ergebnis(StatusCode::Success, wert);
            }),
        );
        let engine = Arc::new(DispatchEngine::neu(
            Arc::new(builder.bauen().unwrap()),
            Duration::from_secs(1),
        ));
        let registry = Arc::new(ConnectionRegistry::neu());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let treiber = Arc::new(VerbindungsTreiber::neu(
            engine,
            Arc::clone(&registry),
            einstellungen,
        ));
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    break;
                };
                let treiber = Arc::clone(&treiber);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    treiber.verarbeiten(stream, peer, shutdown_rx).await;
                });
            }
        });

        (adresse, registry, shutdown_tx)
    }

    async fn client(adresse: SocketAddr) -> Framed<TcpStream, FrameCodec> {
        let stream = TcpStream::connect(adresse).await.unwrap();
        Framed::new(stream, FrameCodec::new())
    }

    fn request_frame(id: &str, method: &str, params: Vec<Value>) -> Frame {
        Frame::data_json(&Request::neu(id, method, params)).unwrap()
    }

    async fn naechste_data(client: &mut Framed<TcpStream, FrameCodec>) -> Response {
        loop {
            match client.next().await.unwrap().unwrap() {
                Frame::Data(bytes) => return serde_json::from_slice(&bytes).unwrap(),
                Frame::Ping(b) => {
                    client.send(Frame::Pong(b)).await.unwrap();
                }
                anderes => panic!("Unerwarteter Frame: {:?}", anderes),
            }
        }
    }

    #[tokio::test]
    async fn anfrage_und_antwort_ueber_tcp() {
        let (adresse, registry, _shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client
            .send(request_frame("1", "echo", vec![json!("hallo")]))
            .await
            .unwrap();
        let antwort = naechste_data(&mut client).await;

        assert_eq!(antwort.id, "1");
        assert_eq!(antwort.data, json!("hallo"));
        assert_eq!(registry.anzahl(), 1);
    }

    #[tokio::test]
    async fn ping_wird_sofort_beantwortet() {
        let (adresse, _registry, _shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client.send(Frame::Ping(42)).await.unwrap();
        match client.next().await.unwrap().unwrap() {
            Frame::Pong(b) => assert_eq!(b, 42),
            anderes => panic!("Pong erwartet, erhalten: {:?}", anderes),
        }
    }

    #[tokio::test]
    async fn kaputtes_json_trennt_nicht() {
        let (adresse, _registry, _shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client
            .send(Frame::Data(bytes::Bytes::from_static(b"kein json")))
            .await
            .unwrap();
        let antwort = naechste_data(&mut client).await;
        assert_eq!(antwort.status_code, StatusCode::WrongBody);

        // Verbindung funktioniert weiterhin
        client
            .send(request_frame("2", "echo", vec![json!(1)]))
            .await
            .unwrap();
        let antwort = naechste_data(&mut client).await;
        assert_eq!(antwort.status_code, StatusCode::Success);
    }

    #[tokio::test]
    async fn unbekannte_methode_liefert_not_found() {
        let (adresse, _registry, _shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client
            .send(request_frame("1", "gibt.es.nicht", vec![]))
            .await
            .unwrap();
        let antwort = naechste_data(&mut client).await;
        assert_eq!(antwort.status_code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn close_frame_raeumt_die_registry() {
        let (adresse, registry, _shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client
            .send(request_frame("1", "echo", vec![json!(0)]))
            .await
            .unwrap();
        naechste_data(&mut client).await;
        assert_eq!(registry.anzahl(), 1);

        client.send(Frame::Close).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.anzahl(), 0);
    }

    #[tokio::test]
    async fn verpasster_heartbeat_trennt() {
        let einstellungen = VerbindungsEinstellungen {
            herzschlag_intervall: Duration::from_millis(50),
            ack_fenster: Duration::from_millis(100),
            ..Default::default()
        };
        let (adresse, registry, _shutdown) = test_server(einstellungen).await;
        let mut client = client(adresse).await;

        client
            .send(request_frame("1", "echo", vec![json!(0)]))
            .await
            .unwrap();
        // Antwort lesen, aber eingehende Pings nie beantworten
        match client.next().await.unwrap().unwrap() {
            Frame::Data(_) | Frame::Ping(_) => {}
            anderes => panic!("Unerwarteter Frame: {:?}", anderes),
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.anzahl(), 0);
    }

    #[tokio::test]
    async fn datenpfad_heartbeat_gilt_als_ack() {
        let einstellungen = VerbindungsEinstellungen {
            herzschlag_intervall: Duration::from_millis(50),
            ack_fenster: Duration::from_millis(150),
            ..Default::default()
        };
        let (adresse, registry, _shutdown) = test_server(einstellungen).await;
        let mut client = client(adresse).await;

        // Statt Pong-Frames nur heartbeat-Datennachrichten senden
        for i in 0..6 {
            client
                .send(request_frame(&i.to_string(), "heartbeat", vec![]))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Eingehende Frames (Pings, Antworten) lesen und verwerfen
            while let Ok(Some(Ok(frame))) =
                tokio::time::timeout(Duration::from_millis(10), client.next()).await
            {
                let _ = frame;
            }
        }

        assert_eq!(registry.anzahl(), 1, "Verbindung muss noch leben");
    }

    #[tokio::test]
    async fn shutdown_trennt_alle_verbindungen() {
        let (adresse, registry, shutdown) = test_server(Default::default()).await;
        let mut client = client(adresse).await;

        client
            .send(request_frame("1", "echo", vec![json!(0)]))
            .await
            .unwrap();
        naechste_data(&mut client).await;
        assert_eq!(registry.anzahl(), 1);

        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.anzahl(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn haengender_writer_wird_nach_frist_abgebrochen() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Waechter(Arc<AtomicBool>);
        impl Drop for Waechter {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let beendet = Arc::new(AtomicBool::new(false));
        let waechter = Waechter(Arc::clone(&beendet));
        let haengt = tokio::spawn(async move {
            let _waechter = waechter;
            std::future::pending::<()>().await;
        });

        schreiber_beenden(haengt, ConnId::new()).await;
        assert!(beendet.load(Ordering::SeqCst), "Writer-Task muss beendet sein");
    }
}
