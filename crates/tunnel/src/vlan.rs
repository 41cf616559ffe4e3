//! VLAN-Allocator – Zaehler plus begrenzte Recycle-Queue
//!
//! Schneller Pfad ist ein monotoner Zaehler ueber `[1, 65535]`. Ist der
//! Zaehler erschoepft, blockiert die Zuteilung begrenzt auf der
//! Recycle-Queue und schlaegt danach mit `VlanErschoepft` fehl.
//!
//! Invariante: ein an einen lebenden Peer gebundenes Suffix wird erst nach
//! der Freigabe wieder vergeben. Freigegebene Suffixe landen in der Queue,
//! nie wieder im Zaehler.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tunnelwerk_core::VlanId;

use crate::error::{TunnelError, TunnelResult};

/// Standard-Wartezeit auf der Recycle-Queue bei erschoepftem Zaehler
pub const RECYCLE_WARTEZEIT: Duration = Duration::from_secs(10);

/// Hoechster vergebbarer Suffix-Wert
const VLAN_MAX: u16 = 65535;

/// O(1)-Slab-Allocator fuer VLAN-Suffixe mit begrenztem Blockieren
pub struct VlanAllocator {
    /// Naechster unvergebener Zaehlerwert; `None` wenn erschoepft
    zaehler: Mutex<Option<u16>>,
    recycle_tx: mpsc::Sender<VlanId>,
    recycle_rx: tokio::sync::Mutex<mpsc::Receiver<VlanId>>,
    wartezeit: Duration,
}

impl VlanAllocator {
    /// Erstellt einen frischen Allocator mit Standard-Wartezeit
    pub fn neu() -> Self {
        Self::mit_wartezeit(RECYCLE_WARTEZEIT)
    }

    /// Erstellt einen Allocator mit eigener Recycle-Wartezeit (fuer Tests)
    pub fn mit_wartezeit(wartezeit: Duration) -> Self {
        // Queue-Kapazitaet deckt den gesamten Wertebereich ab, damit
        // freigeben() nie blockieren oder verwerfen muss.
        let (recycle_tx, recycle_rx) = mpsc::channel(VLAN_MAX as usize);
        Self {
            zaehler: Mutex::new(Some(1)),
            recycle_tx,
            recycle_rx: tokio::sync::Mutex::new(recycle_rx),
            wartezeit,
        }
    }

    /// Teilt ein VLAN-Suffix zu
    ///
    /// Schneller Pfad: Zaehler. Bei Erschoepfung wird begrenzt auf die
    /// Recycle-Queue gewartet.
    pub async fn zuteilen(&self) -> TunnelResult<VlanId> {
        {
            let mut zaehler = self.zaehler.lock();
            if let Some(wert) = *zaehler {
                *zaehler = if wert < VLAN_MAX { Some(wert + 1) } else { None };
                return Ok(VlanId(wert));
            }
        }

        let mut rx = self.recycle_rx.lock().await;
        match tokio::time::timeout(self.wartezeit, rx.recv()).await {
            Ok(Some(vlan)) => Ok(vlan),
            // Sender haelt der Allocator selbst, recv() liefert nie None
            Ok(None) => Err(TunnelError::VlanErschoepft),
            Err(_) => {
                tracing::warn!("VLAN-Zuteilung nach Wartezeit ohne Recycle aufgegeben");
                Err(TunnelError::VlanErschoepft)
            }
        }
    }

    /// Gibt ein Suffix in die Recycle-Queue zurueck (nie in den Zaehler)
    pub fn freigeben(&self, vlan: VlanId) {
        if self.recycle_tx.try_send(vlan).is_err() {
            // Kapazitaet deckt den Wertebereich ab; voll heisst Doppel-Freigabe
            tracing::error!(%vlan, "Recycle-Queue voll – Suffix verworfen");
        }
    }

    /// Aktueller Zaehlerstand (fuer Introspektion und Tests)
    pub fn zaehlerstand(&self) -> Option<u16> {
        *self.zaehler.lock()
    }
}

impl Default for VlanAllocator {
    fn default() -> Self {
        Self::neu()
    }
}
