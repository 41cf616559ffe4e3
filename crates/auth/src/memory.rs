//! In-Memory-Implementierungen der Auth-Kollaboratoren
//!
//! Fuer den Standalone-Betrieb des Servers und fuer Tests. Tokens werden
//! als opake Zufallsstrings ausgegeben und in einer Map nachgeschlagen –
//! kein Ersatz fuer den echten Token-Codec.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use tunnelwerk_core::UserId;

use crate::token::{AuthError, AuthResult, BerechtigungsQuelle, SperrListe, TokenAnspruch, TokenPruefer};

/// Token-Dienst mit In-Memory-Ausgabe und -Pruefung
///
/// Implementiert `TokenPruefer` und `BerechtigungsQuelle` in einem, da
/// beide im Standalone-Betrieb aus derselben Map gespeist werden.
#[derive(Default)]
pub struct MemoryTokenDienst {
    ausgegeben: RwLock<HashMap<String, TokenAnspruch>>,
}

impl MemoryTokenDienst {
    /// Erstellt einen leeren Token-Dienst
    pub fn neu() -> Self {
        Self::default()
    }

    /// Gibt ein neues Token fuer einen Benutzer aus
    pub fn ausgeben(
        &self,
        user_id: UserId,
        username: impl Into<String>,
        permissions: Vec<String>,
        lebensdauer: Duration,
    ) -> String {
        let mut rohbytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut rohbytes);
        let token = URL_SAFE_NO_PAD.encode(rohbytes);

        let anspruch = TokenAnspruch {
            user_id,
            username: username.into(),
            permissions,
            ablauf: Utc::now() + lebensdauer,
        };
        self.ausgegeben.write().insert(token.clone(), anspruch);
        token
    }

    /// Entzieht ein ausgegebenes Token
    pub fn entziehen(&self, token: &str) {
        self.ausgegeben.write().remove(token);
    }
}

#[async_trait]
impl TokenPruefer for MemoryTokenDienst {
    async fn pruefen(&self, token: &str) -> AuthResult<TokenAnspruch> {
        let anspruch = self
            .ausgegeben
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::UngueltigesToken("unbekanntes Token".into()))?;
        if anspruch.ist_abgelaufen() {
            return Err(AuthError::Abgelaufen);
        }
        Ok(anspruch)
    }
}

#[async_trait]
impl BerechtigungsQuelle for MemoryTokenDienst {
    async fn berechtigungen(&self, user_id: UserId) -> Vec<String> {
        self.ausgegeben
            .read()
            .values()
            .find(|a| a.user_id == user_id)
            .map(|a| a.permissions.clone())
            .unwrap_or_default()
    }
}

/// In-Memory-Sperrliste fuer widerrufene Tokens
#[derive(Default)]
pub struct MemorySperrListe {
    gesperrt: RwLock<HashSet<String>>,
}

impl MemorySperrListe {
    /// Erstellt eine leere Sperrliste
    pub fn neu() -> Self {
        Self::default()
    }

    /// Setzt ein Token auf die Sperrliste
    pub fn sperren(&self, token: impl Into<String>) {
        self.gesperrt.write().insert(token.into());
    }
}

#[async_trait]
impl SperrListe for MemorySperrListe {
    async fn ist_gesperrt(&self, token: &str) -> bool {
        self.gesperrt.read().contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_ausgabe_und_pruefung() {
        let dienst = MemoryTokenDienst::neu();
        let uid = UserId::new();
        let token = dienst.ausgeben(uid, "mara", vec!["kanal.senden".into()], Duration::hours(1));

        let anspruch = dienst.pruefen(&token).await.unwrap();
        assert_eq!(anspruch.user_id, uid);
        assert_eq!(anspruch.username, "mara");
        assert!(anspruch.hat_berechtigung("kanal.senden"));
    }

    #[tokio::test]
    async fn unbekanntes_token_wird_abgelehnt() {
        let dienst = MemoryTokenDienst::neu();
        assert!(matches!(
            dienst.pruefen("gibtsnicht").await,
            Err(AuthError::UngueltigesToken(_))
        ));
    }

    #[tokio::test]
    async fn abgelaufenes_token_wird_abgelehnt() {
        let dienst = MemoryTokenDienst::neu();
        let token = dienst.ausgeben(UserId::new(), "alt", vec![], Duration::seconds(-1));
        assert!(matches!(dienst.pruefen(&token).await, Err(AuthError::Abgelaufen)));
    }

    #[tokio::test]
    async fn sperrliste() {
        let liste = MemorySperrListe::neu();
        assert!(!liste.ist_gesperrt("t1").await);
        liste.sperren("t1");
        assert!(liste.ist_gesperrt("t1").await);
    }
}
