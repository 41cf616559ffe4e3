//! PublisherRegistry – benannte Publisher ohne globalen Zustand

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{PubSubError, PubSubResult};
use crate::publisher::Publisher;

/// Registry aller benannten Publisher
#[derive(Default)]
pub struct PublisherRegistry {
    publisher: DashMap<String, Arc<Publisher>>,
}

impl PublisherRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Nimmt einen Publisher auf; der Name muss frei sein
    pub fn registrieren(&self, publisher: Arc<Publisher>) -> PubSubResult<()> {
        let name = publisher.name().to_string();
        match self.publisher.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(PubSubError::ExistiertBereits(name))
            }
            dashmap::mapref::entry::Entry::Vacant(platz) => {
                platz.insert(publisher);
                tracing::debug!(publisher = %name, "Publisher registriert");
                Ok(())
            }
        }
    }

    /// Entfernt und stoppt einen Publisher
    pub fn entfernen(&self, name: &str) -> Option<Arc<Publisher>> {
        let (_, publisher) = self.publisher.remove(name)?;
        publisher.stoppen();
        Some(publisher)
    }

    pub fn holen(&self, name: &str) -> Option<Arc<Publisher>> {
        self.publisher.get(name).map(|e| e.clone())
    }

    pub fn namen(&self) -> Vec<String> {
        self.publisher.iter().map(|e| e.key().clone()).collect()
    }

    pub fn anzahl(&self) -> usize {
        self.publisher.len()
    }

    /// Stoppt alle Publisher, z.B. beim Server-Shutdown
    pub fn alle_stoppen(&self) {
        for eintrag in self.publisher.iter() {
            eintrag.value().stoppen();
        }
        self.publisher.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn doppelter_name_ist_fehler() {
        let registry = PublisherRegistry::neu();
        registry.registrieren(Publisher::neu("status")).unwrap();

        assert!(matches!(
            registry.registrieren(Publisher::neu("status")),
            Err(PubSubError::ExistiertBereits(_))
        ));
        assert_eq!(registry.anzahl(), 1);
    }

    #[tokio::test]
    async fn entfernen_stoppt_den_publisher() {
        let registry = PublisherRegistry::neu();
        registry.registrieren(Publisher::neu("status")).unwrap();

        let publisher = registry.entfernen("status").unwrap();
        assert!(matches!(
            publisher.veroeffentlichen(serde_json::json!(1), None),
            Err(PubSubError::Geschlossen(_))
        ));
        assert!(registry.holen("status").is_none());
    }
}
