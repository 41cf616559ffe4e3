//! Router – punktgetrennte Methodennamen auf Handler-Ketten
//!
//! Der Router wird einmal beim Serverstart ueber den Builder befuellt und
//! ist danach unveraenderlich. Gruppen tragen geordnete Middleware, die
//! jeder darunter registrierten Methode vorangestellt wird; verschachtelte
//! Gruppen komponieren Praefix und Middleware.
//!
//! Doppelte Registrierung ist ein Baufehler, kein Laufzeit-Panic.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::RequestKontext;
use crate::error::{SessionError, SessionResult};

/// Ein Schritt einer Handler-Kette
///
/// Middleware und Endhandler haben dieselbe Signatur; ein Schritt beendet
/// die Kette ueber `ergebnis()` oder `abbrechen()` am Kontext.
pub type Handler = Arc<dyn Fn(Arc<RequestKontext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Verpackt eine async Funktion als Kettenschritt
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<RequestKontext>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ktx| Box::pin(f(ktx)))
}

// ---------------------------------------------------------------------------
// RouterBuilder
// ---------------------------------------------------------------------------

/// Builder fuer den unveraenderlichen Router
#[derive(Default)]
pub struct RouterBuilder {
    routen: HashMap<String, Vec<Handler>>,
    duplikate: Vec<String>,
}

impl RouterBuilder {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Oeffnet eine Gruppe mit eigenem Praefix und eigener Middleware
    pub fn gruppe(&mut self, name: &str) -> Gruppe<'_> {
        Gruppe {
            builder: self,
            praefix: name.to_string(),
            mittel: Vec::new(),
        }
    }

    /// Registriert eine Methode ohne Gruppen-Middleware
    pub fn registrieren(&mut self, methode: &str, schritt: Handler) -> &mut Self {
        self.kette_einfuegen(methode.to_string(), vec![schritt]);
        self
    }

    fn kette_einfuegen(&mut self, methode: String, kette: Vec<Handler>) {
        if self.routen.contains_key(&methode) {
            self.duplikate.push(methode);
            return;
        }
        self.routen.insert(methode, kette);
    }

    /// Schliesst den Bau ab; doppelte Methoden sind ein Fehler
    pub fn bauen(self) -> SessionResult<Router> {
        if let Some(doppelt) = self.duplikate.into_iter().next() {
            return Err(SessionError::DoppelteRoute(doppelt));
        }
        Ok(Router {
            routen: self
                .routen
                .into_iter()
                .map(|(m, kette)| (m, Arc::from(kette.into_boxed_slice())))
                .collect(),
        })
    }
}

/// Gruppen-Sicht auf den Builder
///
/// Middleware muss vor den Methoden registriert werden; spaeter
/// hinzugefuegte Middleware gilt nur fuer spaeter registrierte Methoden.
pub struct Gruppe<'a> {
    builder: &'a mut RouterBuilder,
    praefix: String,
    mittel: Vec<Handler>,
}

impl Gruppe<'_> {
    /// Haengt Middleware an, die jeder folgenden Methode vorausgeht
    pub fn mittel(mut self, schritt: Handler) -> Self {
        self.mittel.push(schritt);
        self
    }

    /// Registriert eine Methode unter dem Gruppen-Praefix
    pub fn registrieren(self, name: &str, schritt: Handler) -> Self {
        let methode = format!("{}.{}", self.praefix, name);
        let mut kette = self.mittel.clone();
        kette.push(schritt);
        self.builder.kette_einfuegen(methode, kette);
        self
    }

    /// Oeffnet eine Untergruppe; erbt Praefix und Middleware
    pub fn gruppe(&mut self, name: &str) -> Gruppe<'_> {
        Gruppe {
            praefix: format!("{}.{}", self.praefix, name),
            mittel: self.mittel.clone(),
            builder: self.builder,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Unveraenderliche Methodentabelle
pub struct Router {
    routen: HashMap<String, Arc<[Handler]>>,
}

impl Router {
    /// Handler-Kette einer Methode
    pub fn kette(&self, methode: &str) -> Option<Arc<[Handler]>> {
        self.routen.get(methode).cloned()
    }

    /// Alle registrierten Methodennamen (fuer Introspektion)
    pub fn methoden(&self) -> Vec<&str> {
        self.routen.keys().map(String::as_str).collect()
    }

    pub fn anzahl(&self) -> usize {
        self.routen.len()
    }
}
