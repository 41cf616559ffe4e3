//! JSON-Nachrichten innerhalb von Data-Frames
//!
//! ```text
//! Request:  { id, method, params[], signature? }
//! Response: { id, method, statusCode, data }
//! ```
//!
//! `method` ist bei Antworten `"reply"` fuer Request/Response-Verkehr und
//! `publish.<name>` fuer Push-Nachrichten aus Publishern und Raeumen.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::StatusCode;

/// Eingehende RPC-Anfrage eines Clients
///
/// Methodennamen sind punktgetrennt (`raum.beitreten`), die Parameter sind
/// pro Handler opak und werden erst dort deserialisiert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Request {
    /// Erstellt eine neue Anfrage (hauptsaechlich fuer Tests)
    pub fn neu(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
            signature: None,
        }
    }
}

/// Antwort des Servers – genau eine pro Anfrage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub method: String,
    #[serde(rename = "statusCode")]
    pub status_code: StatusCode,
    pub data: Value,
}

impl Response {
    /// Passive Antwort auf eine Anfrage (`method = "reply"`)
    pub fn antwort(id: impl Into<String>, code: StatusCode, data: impl Serialize) -> Self {
        Self {
            id: id.into(),
            method: "reply".into(),
            status_code: code,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Push-Nachricht eines Publishers oder Raums
    pub fn publish(id: impl Into<String>, method: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            status_code: StatusCode::Success,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id:{} statusCode:{} data:{}",
            self.id,
            self.status_code.als_zahl(),
            self.data
        )
    }
}

/// Umschlag fuer Publisher-Nachrichten mit Absender-Metadaten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEnvelope {
    #[serde(rename = "senderId")]
    pub sender_id: Option<uuid::Uuid>,
    #[serde(rename = "senderName")]
    pub sender_name: String,
    pub timestamp: i64,
    pub data: Value,
}

impl PublishEnvelope {
    /// Verpackt eine Nutzlast mit Absender und aktuellem Zeitstempel
    pub fn neu(sender_id: Option<uuid::Uuid>, sender_name: impl Into<String>, data: Value) -> Self {
        Self {
            sender_id,
            sender_name: sender_name.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }
}
