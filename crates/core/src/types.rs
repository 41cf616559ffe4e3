//! Gemeinsame Identifikationstypen fuer Tunnelwerk
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Verbindungs-ID (eine pro Transport-Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub Uuid);

impl ConnId {
    /// Erstellt eine neue zufaellige ConnId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Eindeutige Raum-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaumId(pub Uuid);

impl RaumId {
    /// Erstellt eine neue zufaellige RaumId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for RaumId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RaumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "raum:{}", self.0)
    }
}

/// Eindeutige Benutzer-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Erstellt eine neue zufaellige UserId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// 16-Bit-Suffix einer privaten Tunnel-Adresse
///
/// Wird vom VLAN-Allocator aus `[1, 65535]` vergeben; `0` ist kein
/// gueltiger Wert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlanId(pub u16);

impl VlanId {
    /// Leitet die private Tunnel-Adresse aus dem VLAN-Suffix ab
    pub fn private_adresse(&self) -> String {
        format!("10.0.{}.{}/16", self.0 >> 8, self.0 & 0xff)
    }
}

impl std::fmt::Display for VlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vlan:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_id_eindeutig() {
        let a = ConnId::new();
        let b = ConnId::new();
        assert_ne!(a, b, "Zwei neue ConnIds muessen verschieden sein");
    }

    #[test]
    fn raum_id_display() {
        let id = RaumId(Uuid::nil());
        assert!(id.to_string().starts_with("raum:"));
    }

    #[test]
    fn vlan_adresse_ableitung() {
        assert_eq!(VlanId(1).private_adresse(), "10.0.0.1/16");
        assert_eq!(VlanId(0x0102).private_adresse(), "10.0.1.2/16");
        assert_eq!(VlanId(65535).private_adresse(), "10.0.255.255/16");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let cid = ConnId::new();
        let json = serde_json::to_string(&cid).unwrap();
        let cid2: ConnId = serde_json::from_str(&json).unwrap();
        assert_eq!(cid, cid2);
    }
}
