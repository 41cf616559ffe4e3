//! Tunnel-Adapter – ein Interface, viele Peers
//!
//! Der Adapter erzeugt beim Start ein x25519-Schluesselpaar, faehrt das
//! eine geteilte Interface hoch und verwaltet ab dann die Peers. Pro
//! Verbindung existiert hoechstens ein Peer-Eintrag.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};

use tunnelwerk_core::{ConnId, VlanId};

use crate::device::TunnelGeraet;
use crate::error::{TunnelError, TunnelResult};
use crate::vlan::VlanAllocator;

/// Laenge eines rohen x25519-Schluessels in Bytes
pub const PEER_SCHLUESSEL_LAENGE: usize = 32;

/// Callback bei beobachtetem Transport-Endpunkt eines Peers
///
/// Wird vom Datenpfad nach Quelladress-Wechsel gefeuert und treibt die
/// Endpunkt-Korrektur im Raum an. Laeuft ausserhalb jeder Adapter-Sperre.
pub type EndpunktHook = Arc<dyn Fn(ConnId, SocketAddr) + Send + Sync>;

/// Nur der oeffentliche Teil bleibt im Adapter; der geheime Schluessel
/// geht einmalig an das Interface und wird danach verworfen.
struct Identitaet {
    oeffentlich: PublicKey,
}

struct PeerEintrag {
    schluessel: String,
    vlan: VlanId,
    lokaler_port: u16,
    endpunkt: Option<SocketAddr>,
    hook: Option<EndpunktHook>,
}

/// Verwaltet das virtuelle Interface und alle entfernten Peers
pub struct TunnelAdapter {
    geraet: Arc<dyn TunnelGeraet>,
    vlans: VlanAllocator,
    peers: DashMap<ConnId, PeerEintrag>,
    identitaet: RwLock<Option<Identitaet>>,
    listen_port: u16,
}

impl TunnelAdapter {
    /// Erstellt einen neuen, noch nicht gestarteten Adapter
    pub fn neu(geraet: Arc<dyn TunnelGeraet>, listen_port: u16) -> Self {
        Self {
            geraet,
            vlans: VlanAllocator::neu(),
            peers: DashMap::new(),
            identitaet: RwLock::new(None),
            listen_port,
        }
    }

    /// Erzeugt das Schluesselpaar und faehrt das Interface hoch
    pub fn starten(&self) -> TunnelResult<()> {
        let geheim = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let oeffentlich = PublicKey::from(&geheim);

        let geheim_b64 = BASE64.encode(geheim.to_bytes());
        self.geraet.hochfahren(&geheim_b64, self.listen_port)?;

        tracing::info!(
            port = self.listen_port,
            schluessel = %BASE64.encode(oeffentlich.as_bytes()),
            "Tunnel-Interface hochgefahren"
        );
        *self.identitaet.write() = Some(Identitaet { oeffentlich });
        Ok(())
    }

    /// Faehrt das Interface herunter und gibt alle VLAN-Suffixe frei
    pub fn stoppen(&self) {
        for eintrag in self.peers.iter() {
            self.vlans.freigeben(eintrag.vlan);
        }
        self.peers.clear();
        if let Err(e) = self.geraet.herunterfahren() {
            tracing::warn!(fehler = %e, "Interface liess sich nicht sauber herunterfahren");
        }
        *self.identitaet.write() = None;
    }

    /// Oeffentlicher Schluessel des Interfaces als Base64
    pub fn oeffentlicher_schluessel(&self) -> TunnelResult<String> {
        match self.identitaet.read().as_ref() {
            Some(id) => Ok(BASE64.encode(id.oeffentlich.as_bytes())),
            None => Err(TunnelError::NichtGestartet),
        }
    }

    /// Legt einen Peer an und teilt ihm ein VLAN-Suffix zu
    ///
    /// Der Schluessel wird vor der Zuteilung validiert; ein ungueltiger
    /// Schluessel verbraucht kein Suffix. Schlaegt die Programmierung nach
    /// der Zuteilung fehl, wandert das Suffix zurueck in die Recycle-Queue.
    pub async fn peer_hinzufuegen(
        &self,
        conn_id: ConnId,
        schluessel_b64: &str,
        lokaler_port: u16,
        hook: Option<EndpunktHook>,
    ) -> TunnelResult<VlanId> {
        if self.identitaet.read().is_none() {
            return Err(TunnelError::NichtGestartet);
        }

        let roh = BASE64
            .decode(schluessel_b64)
            .map_err(|e| TunnelError::UngueltigerSchluessel(e.to_string()))?;
        if roh.len() != PEER_SCHLUESSEL_LAENGE {
            return Err(TunnelError::UngueltigerSchluessel(format!(
                "Erwarte {} Bytes, erhalten {}",
                PEER_SCHLUESSEL_LAENGE,
                roh.len()
            )));
        }
        if self.peers.contains_key(&conn_id) {
            return Err(TunnelError::PeerExistiert(conn_id.to_string()));
        }

        let vlan = self.vlans.zuteilen().await?;
        let adresse = vlan.private_adresse();

        if let Err(e) = self.geraet.peer_programmieren(schluessel_b64, &adresse) {
            self.vlans.freigeben(vlan);
            return Err(e);
        }

        match self.peers.entry(conn_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // Rennen mit paralleler Anmeldung derselben Verbindung
                let _ = self.geraet.peer_abbauen(schluessel_b64);
                self.vlans.freigeben(vlan);
                Err(TunnelError::PeerExistiert(conn_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(platz) => {
                platz.insert(PeerEintrag {
                    schluessel: schluessel_b64.to_string(),
                    vlan,
                    lokaler_port,
                    endpunkt: None,
                    hook,
                });
                tracing::debug!(%conn_id, %vlan, adresse = %adresse, "Peer angelegt");
                Ok(vlan)
            }
        }
    }

    /// Baut einen Peer ab und recycelt sein Suffix; idempotent
    pub fn peer_entfernen(&self, conn_id: ConnId) {
        if let Some((_, eintrag)) = self.peers.remove(&conn_id) {
            if let Err(e) = self.geraet.peer_abbauen(&eintrag.schluessel) {
                tracing::warn!(%conn_id, fehler = %e, "Peer liess sich nicht abbauen");
            }
            self.vlans.freigeben(eintrag.vlan);
            tracing::debug!(%conn_id, vlan = %eintrag.vlan, "Peer abgebaut");
        }
    }

    /// Meldet einen beobachteten Transport-Endpunkt
    ///
    /// Aktualisiert Eintrag und Interface und feuert danach den
    /// registrierten Hook ausserhalb der Map-Sperre.
    pub fn endpunkt_beobachtet(&self, conn_id: ConnId, adresse: SocketAddr) -> TunnelResult<()> {
        let (schluessel, hook) = match self.peers.get_mut(&conn_id) {
            Some(mut eintrag) => {
                if eintrag.endpunkt == Some(adresse) {
                    return Ok(());
                }
                eintrag.endpunkt = Some(adresse);
                (eintrag.schluessel.clone(), eintrag.hook.clone())
            }
            None => {
                return Err(TunnelError::Geraet(format!(
                    "Kein Peer fuer Verbindung {conn_id}"
                )))
            }
        };

        self.geraet.peer_endpunkt(&schluessel, adresse)?;
        if let Some(hook) = hook {
            hook(conn_id, adresse);
        }
        Ok(())
    }

    /// VLAN-Suffix eines Peers, falls vorhanden
    pub fn peer_vlan(&self, conn_id: ConnId) -> Option<VlanId> {
        self.peers.get(&conn_id).map(|e| e.vlan)
    }

    /// Zuletzt beobachteter Endpunkt eines Peers
    pub fn peer_endpunkt(&self, conn_id: ConnId) -> Option<SocketAddr> {
        self.peers.get(&conn_id).and_then(|e| e.endpunkt)
    }

    /// Gemeldeter lokaler Tunnel-Port eines Peers
    pub fn peer_port(&self, conn_id: ConnId) -> Option<u16> {
        self.peers.get(&conn_id).map(|e| e.lokaler_port)
    }

    /// Anzahl der aktuell angelegten Peers
    pub fn peer_anzahl(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryGeraet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_schluessel() -> String {
        let geheim = StaticSecret::random_from_rng(rand::rngs::OsRng);
        BASE64.encode(PublicKey::from(&geheim).as_bytes())
    }

    fn gestarteter_adapter() -> (Arc<MemoryGeraet>, TunnelAdapter) {
        let geraet = Arc::new(MemoryGeraet::neu());
        let adapter = TunnelAdapter::neu(geraet.clone(), 51820);
        adapter.starten().unwrap();
        (geraet, adapter)
    }

    #[tokio::test]
    async fn peer_anlegen_programmiert_geraet() {
        let (geraet, adapter) = gestarteter_adapter();
        let schluessel = test_schluessel();

        let vlan = adapter
            .peer_hinzufuegen(ConnId::new(), &schluessel, 51821, None)
            .await
            .unwrap();

        assert_eq!(vlan, VlanId(1));
        let peer = geraet.peer(&schluessel).unwrap();
        assert_eq!(peer.adresse, "10.0.0.1/16");
    }

    #[tokio::test]
    async fn ungueltiger_schluessel_verbraucht_kein_vlan() {
        let (_geraet, adapter) = gestarteter_adapter();

        let kurz = BASE64.encode([0u8; 16]);
        assert!(matches!(
            adapter.peer_hinzufuegen(ConnId::new(), &kurz, 0, None).await,
            Err(TunnelError::UngueltigerSchluessel(_))
        ));
        assert!(matches!(
            adapter
                .peer_hinzufuegen(ConnId::new(), "kein base64!", 0, None)
                .await,
            Err(TunnelError::UngueltigerSchluessel(_))
        ));

        // Erster gueltiger Peer bekommt weiterhin das erste Suffix
        let vlan = adapter
            .peer_hinzufuegen(ConnId::new(), &test_schluessel(), 0, None)
            .await
            .unwrap();
        assert_eq!(vlan, VlanId(1));
    }

    #[tokio::test]
    async fn doppelte_verbindung_wird_abgelehnt() {
        let (_geraet, adapter) = gestarteter_adapter();
        let conn = ConnId::new();

        adapter
            .peer_hinzufuegen(conn, &test_schluessel(), 0, None)
            .await
            .unwrap();
        assert!(matches!(
            adapter
                .peer_hinzufuegen(conn, &test_schluessel(), 0, None)
                .await,
            Err(TunnelError::PeerExistiert(_))
        ));
        assert_eq!(adapter.peer_anzahl(), 1);
    }

    #[tokio::test]
    async fn entfernen_ist_idempotent_und_recycelt() {
        let (geraet, adapter) = gestarteter_adapter();
        let conn = ConnId::new();
        let schluessel = test_schluessel();

        let vlan = adapter
            .peer_hinzufuegen(conn, &schluessel, 0, None)
            .await
            .unwrap();
        adapter.peer_entfernen(conn);
        adapter.peer_entfernen(conn);

        assert_eq!(adapter.peer_anzahl(), 0);
        assert!(geraet.peer(&schluessel).is_none());
        // Suffix liegt in der Recycle-Queue, Zaehler laeuft weiter
        let naechstes = adapter
            .peer_hinzufuegen(ConnId::new(), &test_schluessel(), 0, None)
            .await
            .unwrap();
        assert_ne!(naechstes, vlan);
    }

    #[tokio::test]
    async fn endpunkt_hook_feuert_bei_wechsel() {
        let (geraet, adapter) = gestarteter_adapter();
        let conn = ConnId::new();
        let schluessel = test_schluessel();
        let feuerrate = Arc::new(AtomicUsize::new(0));

        let zaehler = feuerrate.clone();
        let hook: EndpunktHook = Arc::new(move |_, _| {
            zaehler.fetch_add(1, Ordering::SeqCst);
        });
        adapter
            .peer_hinzufuegen(conn, &schluessel, 0, Some(hook))
            .await
            .unwrap();

        let adresse: SocketAddr = "203.0.113.9:51820".parse().unwrap();
        adapter.endpunkt_beobachtet(conn, adresse).unwrap();
        // Unveraenderter Endpunkt feuert nicht erneut
        adapter.endpunkt_beobachtet(conn, adresse).unwrap();

        assert_eq!(feuerrate.load(Ordering::SeqCst), 1);
        assert_eq!(geraet.peer(&schluessel).unwrap().endpunkt, Some(adresse));
        assert_eq!(adapter.peer_endpunkt(conn), Some(adresse));
    }

    #[tokio::test]
    async fn nicht_gestarteter_adapter_lehnt_ab() {
        let adapter = TunnelAdapter::neu(Arc::new(MemoryGeraet::neu()), 51820);
        assert!(matches!(
            adapter
                .peer_hinzufuegen(ConnId::new(), &test_schluessel(), 0, None)
                .await,
            Err(TunnelError::NichtGestartet)
        ));
        assert!(adapter.oeffentlicher_schluessel().is_err());
    }
}
