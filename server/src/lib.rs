//! tunnelwerk-server – Bibliotheks-Root
//!
//! Verdrahtet die Subsysteme (Tunnel, Raeume, Publisher, Sessions) und
//! stellt den Einstiegspunkt fuer Integrationstests bereit.

pub mod config;
pub mod handlers;
pub mod state;

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use tunnelwerk_auth::{MemorySperrListe, MemoryTokenDienst};
use tunnelwerk_pubsub::PublisherRegistry;
use tunnelwerk_rooms::RaumVerwaltung;
use tunnelwerk_session::{ConnectionRegistry, DispatchEngine, VerbindungsTreiber};
use tunnelwerk_tunnel::{MemoryGeraet, TunnelAdapter};

use config::ServerConfig;
use state::ServerState;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Verdrahtet alle Subsysteme zum geteilten Server-Zustand
    ///
    /// Standalone-Betrieb: In-Memory-Tunnelgeraet und In-Memory-Auth.
    /// Ein echtes Geraet und ein echter Token-Dienst werden hier
    /// eingehaengt, ohne dass die Handler sich aendern.
    pub fn zustand_bauen(config: ServerConfig) -> Result<Arc<ServerState>> {
        let geraet = Arc::new(MemoryGeraet::neu());
        let tunnel = Arc::new(TunnelAdapter::neu(geraet, config.tunnel.listen_port));
        tunnel.starten()?;

        let raeume = RaumVerwaltung::neu(Arc::clone(&tunnel), config.raum_idle_frist());
        let token_dienst = Arc::new(MemoryTokenDienst::neu());

        Ok(Arc::new(ServerState {
            verbindungen: Arc::new(ConnectionRegistry::neu()),
            publisher: Arc::new(PublisherRegistry::neu()),
            raeume,
            tunnel,
            token_pruefer: Arc::clone(&token_dienst) as _,
            berechtigungen: token_dienst,
            sperrliste: Arc::new(MemorySperrListe::neu()),
            config,
        }))
    }

    /// Startet den Server und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Subsysteme verdrahten (Tunnel-Identitaet, Registries)
    /// 2. Router bauen (doppelte Methoden brechen den Start ab)
    /// 3. TCP-Listener annehmen, eine Task pro Verbindung
    /// 4. Auf Ctrl-C warten, dann geordnet herunterfahren
    pub async fn starten(self) -> Result<()> {
        let bind = self.config.bind_adresse();
        let state = Self::zustand_bauen(self.config)?;

        let router = handlers::router_bauen(&state)?;
        let engine = Arc::new(DispatchEngine::neu(
            Arc::new(router),
            state.config.anfrage_zeitlimit(),
        ));
        let treiber = Arc::new(VerbindungsTreiber::neu(
            engine,
            Arc::clone(&state.verbindungen),
            state.config.session_einstellungen(),
        ));

        let listener = TcpListener::bind(&bind).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            adresse = %bind,
            tunnel_port = state.config.tunnel.listen_port,
            "Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );

        loop {
            tokio::select! {
                angenommen = listener.accept() => {
                    let (stream, adresse) = match angenommen {
                        Ok(paar) => paar,
                        Err(e) => {
                            tracing::warn!(fehler = %e, "Accept fehlgeschlagen");
                            continue;
                        }
                    };
                    let treiber = Arc::clone(&treiber);
                    let shutdown_rx = shutdown_rx.clone();
                    tokio::spawn(async move {
                        treiber.verarbeiten(stream, adresse, shutdown_rx).await;
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        state.raeume.alle_schliessen();
        state.publisher.alle_stoppen();
        state.verbindungen.alle_trennen("Server-Shutdown");
        state.tunnel.stoppen();
        tracing::info!("Server beendet");
        Ok(())
    }
}
