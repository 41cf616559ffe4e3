//! Fehlertypen fuer Publisher und Registry

use thiserror::Error;

/// Fehlertyp der Publish/Subscribe-Schicht
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Verbindung ist bereits Abonnent dieses Publishers
    #[error("Bereits abonniert: {0}")]
    BereitsAbonniert(String),

    /// Publisher-Name ist in der Registry schon vergeben
    #[error("Publisher existiert bereits: {0}")]
    ExistiertBereits(String),

    /// Publisher wurde gestoppt, keine Veroeffentlichung mehr moeglich
    #[error("Publisher geschlossen: {0}")]
    Geschlossen(String),

    /// Zeitplan ist weder humantime-Dauer noch Cron-Ausdruck
    #[error("Ungueltiger Zeitplan: {0}")]
    UngueltigerZeitplan(String),
}

/// Result-Typ der Publish/Subscribe-Schicht
pub type PubSubResult<T> = Result<T, PubSubError>;
