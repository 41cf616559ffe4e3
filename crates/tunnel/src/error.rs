//! Fehlertypen fuer den Tunnel-Adapter

use thiserror::Error;

/// Fehlertyp des Tunnel-Adapters
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Peer-Schluessel ist kein gueltiges Base64 oder hat falsche Laenge
    #[error("Ungueltiger oeffentlicher Schluessel: {0}")]
    UngueltigerSchluessel(String),

    /// Peer fuer diese Verbindung existiert bereits
    #[error("Peer existiert bereits: {0}")]
    PeerExistiert(String),

    /// VLAN-Pool erschoepft und Recycle-Wartezeit abgelaufen
    #[error("Kein VLAN-Suffix verfuegbar")]
    VlanErschoepft,

    /// Interface-Operation fehlgeschlagen
    #[error("Interface-Fehler: {0}")]
    Geraet(String),

    /// Adapter wurde nicht gestartet
    #[error("Adapter nicht gestartet")]
    NichtGestartet,
}

/// Result-Typ des Tunnel-Adapters
pub type TunnelResult<T> = Result<T, TunnelError>;
