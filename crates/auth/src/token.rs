//! Token-Anspruch und Kollaborator-Traits
//!
//! `TokenPruefer::pruefen` ist die einzige Stelle, an der der Kern mit dem
//! Token-Codec in Beruehrung kommt: Token rein, validierter Anspruch raus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tunnelwerk_core::UserId;

/// Fehlertyp der Auth-Kollaboratoren
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token ist syntaktisch oder kryptografisch ungueltig
    #[error("Ungueltiges Token: {0}")]
    UngueltigesToken(String),

    /// Token ist abgelaufen
    #[error("Token abgelaufen")]
    Abgelaufen,

    /// Token steht auf der Sperrliste
    #[error("Token gesperrt")]
    Gesperrt,

    /// Interner Fehler im Kollaborator
    #[error("Interner Auth-Fehler: {0}")]
    Intern(String),
}

/// Result-Typ der Auth-Kollaboratoren
pub type AuthResult<T> = Result<T, AuthError>;

/// Validierter Inhalt eines Bearer-Tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAnspruch {
    pub user_id: UserId,
    pub username: String,
    pub permissions: Vec<String>,
    pub ablauf: DateTime<Utc>,
}

impl TokenAnspruch {
    /// Prueft ob der Anspruch bereits abgelaufen ist
    pub fn ist_abgelaufen(&self) -> bool {
        self.ablauf <= Utc::now()
    }

    /// Prueft ob der Anspruch eine Berechtigung traegt
    pub fn hat_berechtigung(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p == name)
    }
}

/// Verifiziert ein Bearer-Token und liefert den validierten Anspruch
#[async_trait]
pub trait TokenPruefer: Send + Sync {
    /// `verify(token) -> (userId, username, permissions, expiry) | error`
    async fn pruefen(&self, token: &str) -> AuthResult<TokenAnspruch>;
}

/// Sperrliste fuer widerrufene Tokens
#[async_trait]
pub trait SperrListe: Send + Sync {
    /// Prueft ob ein Token gesperrt ist (vor jedem Auth-Aufruf)
    async fn ist_gesperrt(&self, token: &str) -> bool;
}

/// Berechtigungs-Lookup aus der Persistenzschicht
///
/// Wird genau einmal beim Auth-Aufruf konsultiert.
#[async_trait]
pub trait BerechtigungsQuelle: Send + Sync {
    async fn berechtigungen(&self, user_id: UserId) -> Vec<String>;
}
