//! Fehlertypen fuer die Session-Schicht

use thiserror::Error;

/// Fehlertyp der Verbindungs- und Dispatch-Engine
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung wurde bereits getrennt
    #[error("Verbindung getrennt")]
    Getrennt,

    /// Ausgangs-Queue voll, Nachricht verworfen
    #[error("Sende-Queue voll")]
    QueueVoll,

    /// Eingangs-Queue nach Wartezeit weiterhin voll
    #[error("Eingangs-Queue ueberlastet")]
    Ueberlastet,

    /// Doppelte Routen-Registrierung beim Router-Bau
    #[error("Methode doppelt registriert: {0}")]
    DoppelteRoute(String),

    /// Nachricht liess sich nicht serialisieren
    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),
}

/// Result-Typ der Session-Schicht
pub type SessionResult<T> = Result<T, SessionError>;
