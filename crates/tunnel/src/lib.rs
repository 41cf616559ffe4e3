//! tunnelwerk-tunnel – Tunnel-Adapter und VLAN-Allocator
//!
//! Der Adapter besitzt genau ein langlebiges virtuelles Interface samt
//! Schluesselpaar und verwaltet die entfernten Tunnel-Endpunkte ("Peers").
//! Pro Peer wird ein 16-Bit-VLAN-Suffix zugeteilt, aus dem sich die
//! private Tunnel-Adresse ableitet.
//!
//! ## Architektur
//!
//! ```text
//! TunnelAdapter
//!     |
//!     +-- TunnelGeraet (Trait-Seam zum eigentlichen Interface)
//!     +-- VlanAllocator (Zaehler + Recycle-Queue)
//!     +-- Peers (ConnId -> PeerEintrag)
//! ```
//!
//! Peer-Lebensdauer ist 1:1 an "Mitglied in irgendeinem Raum" gekoppelt:
//! angelegt beim Raumbeitritt, abgebaut beim Verlassen oder beim
//! Verbindungs-Teardown.

pub mod adapter;
pub mod device;
pub mod error;
pub mod vlan;

// Bequeme Re-Exporte
pub use adapter::{EndpunktHook, TunnelAdapter, PEER_SCHLUESSEL_LAENGE};
pub use device::{MemoryGeraet, TunnelGeraet};
pub use error::{TunnelError, TunnelResult};
pub use vlan::VlanAllocator;
