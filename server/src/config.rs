//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Einstellungen der persistenten Verbindungen
    pub verbindung: VerbindungsEinstellungen,
    /// Tunnel-Einstellungen
    pub tunnel: TunnelEinstellungen,
    /// Raum-Einstellungen
    pub raum: RaumEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse des TCP-Listeners
    pub bind_adresse: String,
    /// Port des TCP-Listeners
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8872,
        }
    }
}

/// Einstellungen der persistenten Verbindungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Abstand zwischen zwei Heartbeat-Pings
    pub herzschlag_sek: u64,
    /// Fenster, in dem das Heartbeat-Ack eintreffen muss
    pub ack_fenster_sek: u64,
    /// Maximales Verbindungsalter
    pub lebensdauer_sek: u64,
    /// Zeitlimit pro Anfrage
    pub anfrage_zeitlimit_sek: u64,
    /// Tiefe der Verbindungs-Queues
    pub queue_tiefe: usize,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            herzschlag_sek: 30,
            ack_fenster_sek: 10,
            lebensdauer_sek: 60 * 60 * 24,
            anfrage_zeitlimit_sek: 10,
            queue_tiefe: 64,
        }
    }
}

/// Tunnel-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelEinstellungen {
    /// Listen-Port des Tunnel-Interfaces
    pub listen_port: u16,
}

impl Default for TunnelEinstellungen {
    fn default() -> Self {
        Self { listen_port: 51820 }
    }
}

/// Raum-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaumEinstellungen {
    /// Frist, nach der sich untaetige Raeume selbst schliessen
    pub idle_minuten: u64,
}

impl Default for RaumEinstellungen {
    fn default() -> Self {
        Self { idle_minuten: 30 }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Ausgabeformat: "text" oder "json"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Vollstaendige Bind-Adresse des TCP-Listeners
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Verbindungs-Einstellungen in der Form der Session-Schicht
    pub fn session_einstellungen(&self) -> tunnelwerk_session::VerbindungsEinstellungen {
        tunnelwerk_session::VerbindungsEinstellungen {
            herzschlag_intervall: Duration::from_secs(self.verbindung.herzschlag_sek),
            ack_fenster: Duration::from_secs(self.verbindung.ack_fenster_sek),
            lebensdauer: Duration::from_secs(self.verbindung.lebensdauer_sek),
            queue_tiefe: self.verbindung.queue_tiefe,
            max_frame_groesse: tunnelwerk_protocol::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn anfrage_zeitlimit(&self) -> Duration {
        Duration::from_secs(self.verbindung.anfrage_zeitlimit_sek)
    }

    pub fn raum_idle_frist(&self) -> Duration {
        Duration::from_secs(self.raum.idle_minuten * 60)
    }
}
