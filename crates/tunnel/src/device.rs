//! Trait-Seam zum virtuellen Tunnel-Interface
//!
//! Der Adapter spricht nie direkt mit einem Kernel-Interface, sondern
//! nur ueber `TunnelGeraet`. Tests haengen `MemoryGeraet` ein und
//! pruefen die aufgezeichneten Operationen.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{TunnelError, TunnelResult};

/// Operationen auf dem darunterliegenden virtuellen Interface
pub trait TunnelGeraet: Send + Sync {
    /// Faehrt das Interface mit dem eigenen privaten Schluessel hoch
    fn hochfahren(&self, privater_schluessel: &str, port: u16) -> TunnelResult<()>;

    /// Programmiert einen Peer mit seiner privaten Tunnel-Adresse
    fn peer_programmieren(&self, oeffentlicher_schluessel: &str, adresse: &str) -> TunnelResult<()>;

    /// Schreibt den beobachteten Transport-Endpunkt eines Peers
    fn peer_endpunkt(&self, oeffentlicher_schluessel: &str, endpunkt: SocketAddr)
        -> TunnelResult<()>;

    /// Entfernt einen Peer vom Interface
    fn peer_abbauen(&self, oeffentlicher_schluessel: &str) -> TunnelResult<()>;

    /// Faehrt das Interface herunter
    fn herunterfahren(&self) -> TunnelResult<()>;
}

/// Zustand eines programmierten Peers im Speicher-Interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeraetPeer {
    pub adresse: String,
    pub endpunkt: Option<SocketAddr>,
}

#[derive(Default)]
struct MemoryZustand {
    hochgefahren: bool,
    port: u16,
    peers: HashMap<String, GeraetPeer>,
}

/// In-Memory-Interface fuer Tests und Trockenlauf
#[derive(Default)]
pub struct MemoryGeraet {
    zustand: Mutex<MemoryZustand>,
}

impl MemoryGeraet {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Anzahl der aktuell programmierten Peers
    pub fn peer_anzahl(&self) -> usize {
        self.zustand.lock().peers.len()
    }

    /// Zustand eines Peers, falls programmiert
    pub fn peer(&self, oeffentlicher_schluessel: &str) -> Option<GeraetPeer> {
        self.zustand.lock().peers.get(oeffentlicher_schluessel).cloned()
    }

    /// Ob das Interface hochgefahren ist
    pub fn laeuft(&self) -> bool {
        self.zustand.lock().hochgefahren
    }
}

impl TunnelGeraet for MemoryGeraet {
    fn hochfahren(&self, _privater_schluessel: &str, port: u16) -> TunnelResult<()> {
        let mut z = self.zustand.lock();
        z.hochgefahren = true;
        z.port = port;
        Ok(())
    }

    fn peer_programmieren(&self, oeffentlicher_schluessel: &str, adresse: &str) -> TunnelResult<()> {
        let mut z = self.zustand.lock();
        if !z.hochgefahren {
            return Err(TunnelError::NichtGestartet);
        }
        z.peers.insert(
            oeffentlicher_schluessel.to_string(),
            GeraetPeer {
                adresse: adresse.to_string(),
                endpunkt: None,
            },
        );
        Ok(())
    }

    fn peer_endpunkt(
        &self,
        oeffentlicher_schluessel: &str,
        endpunkt: SocketAddr,
    ) -> TunnelResult<()> {
        let mut z = self.zustand.lock();
        match z.peers.get_mut(oeffentlicher_schluessel) {
            Some(peer) => {
                peer.endpunkt = Some(endpunkt);
                Ok(())
            }
            None => Err(TunnelError::Geraet(format!(
                "Unbekannter Peer: {oeffentlicher_schluessel}"
            ))),
        }
    }

    fn peer_abbauen(&self, oeffentlicher_schluessel: &str) -> TunnelResult<()> {
        self.zustand.lock().peers.remove(oeffentlicher_schluessel);
        Ok(())
    }

    fn herunterfahren(&self) -> TunnelResult<()> {
        let mut z = self.zustand.lock();
        z.hochgefahren = false;
        z.peers.clear();
        Ok(())
    }
}
