use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "1";

/// Envelope exchanged between board clients and the hub's change feed.
///
/// `hello` announces a client and the document paths it wants snapshots
/// for; `replace` carries an entire document, in both directions. There is
/// no partial-update message: whole-document replacement is the only
/// primitive, by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub version: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloBody {
    pub client_id: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl SyncEnvelope {
    pub fn hello(sender_id: &str, paths: Vec<String>) -> Self {
        let body = HelloBody {
            client_id: sender_id.to_string(),
            paths,
        };
        Self {
            version: PROTOCOL_VERSION.to_string(),
            r#type: "hello".to_string(),
            sender_id: sender_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: String::new(),
            body: serde_json::to_value(body).unwrap_or(Value::Null),
        }
    }

    pub fn replace(sender_id: &str, path: &str, body: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            r#type: "replace".to_string(),
            sender_id: sender_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: path.to_string(),
            body,
        }
    }
}

pub fn validate_envelope(envelope: &SyncEnvelope) -> Result<(), &'static str> {
    if envelope.version.is_empty() || envelope.r#type.is_empty() || envelope.sender_id.is_empty() {
        return Err("missing_required_fields");
    }
    if envelope.version != PROTOCOL_VERSION {
        return Err("unsupported_version");
    }
    if envelope.r#type == "replace" && envelope.path.is_empty() {
        return Err("missing_path");
    }
    if chrono::DateTime::parse_from_rfc3339(&envelope.timestamp).is_err() {
        return Err("invalid_timestamp");
    }
    Ok(())
}
