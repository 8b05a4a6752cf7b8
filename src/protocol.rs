//! Wire protocol between browser clients and the bridge.
//!
//! Inbound frames are `{"type": ..., "payload": {...}}` envelopes decoded into
//! an [`Intent`]. Outbound frames are [`OutboundEvent`]s rendered as
//! `{"type": ..., "payload": ...}`, except `internal_log` which carries its
//! text in a `data` field.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::parser::{AttributeValue, DiscoveredDevice};

/// Raw client envelope before the payload is interpreted.
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Discover,
    Commission,
    Invoke,
    Subscribe,
    GetStatus,
}

impl IntentKind {
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "discover_devices" => Some(IntentKind::Discover),
            "commission_device" => Some(IntentKind::Commission),
            "device_command" => Some(IntentKind::Invoke),
            "subscribe_attribute" => Some(IntentKind::Subscribe),
            "get_status" => Some(IntentKind::GetStatus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Discover => "discover_devices",
            IntentKind::Commission => "commission_device",
            IntentKind::Invoke => "device_command",
            IntentKind::Subscribe => "subscribe_attribute",
            IntentKind::GetStatus => "get_status",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid message format: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unknown command type received: {0}")]
    UnknownType(String),

    #[error("Invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: IntentKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Discover,
    Commission(CommissionRequest),
    Invoke(InvokeRequest),
    Subscribe(SubscribeRequest),
    GetStatus(StatusRequest),
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Discover => IntentKind::Discover,
            Intent::Commission(_) => IntentKind::Commission,
            Intent::Invoke(_) => IntentKind::Invoke,
            Intent::Subscribe(_) => IntentKind::Subscribe,
            Intent::GetStatus(_) => IntentKind::GetStatus,
        }
    }

    pub fn decode(envelope: ClientEnvelope) -> Result<Self, DecodeError> {
        let kind = IntentKind::from_type(&envelope.kind)
            .ok_or_else(|| DecodeError::UnknownType(envelope.kind.clone()))?;
        let payload = match envelope.payload {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(v) => v,
        };
        let invalid = |source: serde_json::Error| DecodeError::InvalidPayload { kind, source };

        Ok(match kind {
            IntentKind::Discover => Intent::Discover,
            IntentKind::Commission => {
                Intent::Commission(serde_json::from_value(payload).map_err(invalid)?)
            }
            IntentKind::Invoke => Intent::Invoke(serde_json::from_value(payload).map_err(invalid)?),
            IntentKind::Subscribe => {
                Intent::Subscribe(serde_json::from_value(payload).map_err(invalid)?)
            }
            IntentKind::GetStatus => {
                Intent::GetStatus(serde_json::from_value(payload).map_err(invalid)?)
            }
        })
    }
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<Intent, DecodeError> {
    let envelope: ClientEnvelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    Intent::decode(envelope)
}

// Identifier fields arrive as strings from some clients and numbers from
// others. Missing fields decode as empty and are validated by the dispatcher.

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommissionRequest {
    #[serde(deserialize_with = "lenient_string")]
    pub setup_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub discriminator: String,
    #[serde(deserialize_with = "lenient_string")]
    pub node_id_to_assign: String,
    #[serde(deserialize_with = "lenient_string")]
    pub vendor_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub product_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvokeRequest {
    #[serde(deserialize_with = "lenient_string")]
    pub node_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub endpoint_id: String,
    pub cluster: String,
    pub command: String,
    #[serde(deserialize_with = "lenient_map")]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribeRequest {
    #[serde(deserialize_with = "lenient_string")]
    pub node_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub endpoint_id: String,
    pub cluster: String,
    pub attribute: String,
    #[serde(deserialize_with = "lenient_string")]
    pub min_interval: String,
    #[serde(deserialize_with = "lenient_string")]
    pub max_interval: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusRequest {
    #[serde(deserialize_with = "lenient_string")]
    pub node_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub endpoint_id: String,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::invalid_type(
            de::Unexpected::Other(json_type(&other)),
            &"a string or number",
        )),
    }
}

/// An object, or null read as an empty map.
fn lenient_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Map<String, Value>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(de::Error::invalid_type(
            de::Unexpected::Other(json_type(&other)),
            &"an object or null",
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── outbound ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub devices: Vec<DiscoveredDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissioningOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The discriminator from the request. Concurrent commissionings are
    /// told apart by this alone.
    #[serde(rename = "originalDiscriminator", skip_serializing_if = "Option::is_none")]
    pub correlation_discriminator: Option<String>,
}

impl CommissioningOutcome {
    pub fn failed(error: impl Into<String>, discriminator: &str) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            correlation_discriminator: (!discriminator.is_empty()).then(|| discriminator.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn failed(node_id: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            node_id: node_id.to_string(),
            details: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeUpdate {
    pub node_id: String,
    pub endpoint_id: String,
    pub cluster: String,
    pub attribute: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub node_id: String,
    pub endpoint_id: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Narrative log channel an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Discovery,
    Commissioning,
    Command,
    Subscription,
}

impl LogCategory {
    pub fn event(self, text: impl Into<String>) -> OutboundEvent {
        let text = text.into();
        match self {
            LogCategory::Discovery => OutboundEvent::DiscoveryLog(text),
            LogCategory::Commissioning => OutboundEvent::CommissioningLog(text),
            LogCategory::Command => OutboundEvent::CommandLog(text),
            LogCategory::Subscription => OutboundEvent::SubscriptionLog(text),
        }
    }
}

/// Everything the bridge can send to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    DiscoveryLog(String),
    DiscoveryResult(DiscoveryResult),
    CommissioningLog(String),
    CommissioningStatus(CommissioningOutcome),
    CommandLog(String),
    CommandResponse(CommandResponse),
    SubscriptionLog(String),
    AttributeUpdate(AttributeUpdate),
    Status(StatusReport),
    Error(String),
    InternalLog(String),
}

#[derive(Serialize)]
struct ServerEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a str>,
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::DiscoveryLog(_) => "discovery_log",
            OutboundEvent::DiscoveryResult(_) => "discovery_result",
            OutboundEvent::CommissioningLog(_) => "commissioning_log",
            OutboundEvent::CommissioningStatus(_) => "commissioning_status",
            OutboundEvent::CommandLog(_) => "command_log",
            OutboundEvent::CommandResponse(_) => "command_response",
            OutboundEvent::SubscriptionLog(_) => "subscription_log",
            OutboundEvent::AttributeUpdate(_) => "attribute_update",
            OutboundEvent::Status(_) => "get_status",
            OutboundEvent::Error(_) => "error",
            OutboundEvent::InternalLog(_) => "internal_log",
        }
    }

    /// Render as a JSON text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let kind = self.kind();
        let envelope = match self {
            OutboundEvent::InternalLog(text) => ServerEnvelope {
                kind,
                payload: None,
                data: Some(text),
            },
            other => ServerEnvelope {
                kind,
                payload: Some(other.payload()?),
                data: None,
            },
        };
        serde_json::to_string(&envelope)
    }

    fn payload(&self) -> serde_json::Result<Value> {
        match self {
            OutboundEvent::DiscoveryLog(text)
            | OutboundEvent::CommissioningLog(text)
            | OutboundEvent::CommandLog(text)
            | OutboundEvent::SubscriptionLog(text)
            | OutboundEvent::InternalLog(text) => Ok(Value::String(text.clone())),
            OutboundEvent::DiscoveryResult(p) => serde_json::to_value(p),
            OutboundEvent::CommissioningStatus(p) => serde_json::to_value(p),
            OutboundEvent::CommandResponse(p) => serde_json::to_value(p),
            OutboundEvent::AttributeUpdate(p) => serde_json::to_value(p),
            OutboundEvent::Status(p) => serde_json::to_value(p),
            OutboundEvent::Error(message) => Ok(serde_json::json!({ "message": message })),
        }
    }
}
