//! Statuscodes fuer Antworten
//!
//! Flacher Integer-Enum, nach Kategorien gruppiert. Auf dem Draht werden
//! die Codes als nackte Zahlen serialisiert (`statusCode`-Feld).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Statuscode einer Antwort
///
/// Kategorien: Erfolg (0), generischer Fehler (1–2), Anfragefehler (10xxx),
/// Auth/Berechtigung (101xx), protokollspezifisch (102xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    Unknown,
    Forbidden,

    WrongBody,
    WrongData,
    Timeout,
    NotFound,
    TooManyRequests,
    AlreadyExist,

    NoToken,
    WrongToken,
    BlackToken,
    PermissionDenied,

    ResolveFailed,
    DuplicateAuth,
}

impl StatusCode {
    /// Numerischer Wert auf dem Draht
    pub fn als_zahl(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Unknown => 1,
            Self::Forbidden => 2,
            Self::WrongBody => 10001,
            Self::WrongData => 10002,
            Self::Timeout => 10003,
            Self::NotFound => 10004,
            Self::TooManyRequests => 10005,
            Self::AlreadyExist => 10006,
            Self::NoToken => 10101,
            Self::WrongToken => 10102,
            Self::BlackToken => 10103,
            Self::PermissionDenied => 10104,
            Self::ResolveFailed => 10201,
            Self::DuplicateAuth => 10202,
        }
    }

    /// Rueckabbildung vom Drahtwert; unbekannte Werte werden `Unknown`
    pub fn aus_zahl(v: i32) -> Self {
        match v {
            0 => Self::Success,
            2 => Self::Forbidden,
            10001 => Self::WrongBody,
            10002 => Self::WrongData,
            10003 => Self::Timeout,
            10004 => Self::NotFound,
            10005 => Self::TooManyRequests,
            10006 => Self::AlreadyExist,
            10101 => Self::NoToken,
            10102 => Self::WrongToken,
            10103 => Self::BlackToken,
            10104 => Self::PermissionDenied,
            10201 => Self::ResolveFailed,
            10202 => Self::DuplicateAuth,
            _ => Self::Unknown,
        }
    }

    /// Gibt true zurueck wenn der Code ein Erfolg ist
    pub fn ist_erfolg(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.als_zahl())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i32::deserialize(deserializer)?;
        Ok(Self::aus_zahl(v))
    }
}
