//! Fehlertypen fuer Raeume und Raum-Verwaltung

use thiserror::Error;
use tunnelwerk_core::RaumId;
use tunnelwerk_tunnel::TunnelError;

/// Fehlertyp der Raum-Schicht
///
/// Die Beitritts-Fehler sind absichtlich getrennt, damit die Handler
/// unterscheidbare Statuscodes liefern koennen.
#[derive(Debug, Error)]
pub enum RaumError {
    /// Raum ist per Sperr-Flag fuer Beitritte geschlossen
    #[error("Raum ist gesperrt")]
    Verboten,

    /// Maximale Mitgliederzahl erreicht
    #[error("Raum ist voll")]
    Voll,

    /// IP, Benutzer oder Geraet steht auf der Sperrliste des Raums
    #[error("Auf der Sperrliste: {0}")]
    AufSperrliste(String),

    /// Passwort fehlt oder stimmt nicht
    #[error("Falsches Raum-Passwort")]
    FalschesPasswort,

    /// Verbindung ist kein Mitglied dieses Raums
    #[error("Kein Mitglied dieses Raums")]
    KeinMitglied,

    /// Raum existiert nicht oder ist bereits abgebaut
    #[error("Raum nicht gefunden: {0}")]
    NichtGefunden(RaumId),

    /// Beitritts-Token ohne zugehoerigen Raum
    #[error("Unbekanntes Beitritts-Token")]
    UnbekanntesToken,

    /// Raum ist geschlossen oder wird gerade abgebaut
    #[error("Raum ist geschlossen")]
    Geschlossen,

    /// Tunnel-Peer liess sich nicht anlegen oder abbauen
    #[error("Tunnel-Fehler: {0}")]
    Tunnel(#[from] TunnelError),
}

/// Result-Typ der Raum-Schicht
pub type RaumResult<T> = Result<T, RaumError>;
