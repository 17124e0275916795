use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::metrics::LiveMetrics;

/// Actions understood by the metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectorAction {
    GetSnapshot,
    GetLiveMetrics,
    SetInterval,
    RefreshStatic,
    Stop,
}

impl CollectorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorAction::GetSnapshot => "getSnapshot",
            CollectorAction::GetLiveMetrics => "getLiveMetrics",
            CollectorAction::SetInterval => "setInterval",
            CollectorAction::RefreshStatic => "refreshStatic",
            CollectorAction::Stop => "stop",
        }
    }
}

impl std::fmt::Display for CollectorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host to collector request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRequest {
    pub id: u64,
    pub action: CollectorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Collector reply to a request, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorResponse {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectorResponse {
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Every message kind that travels on the collector channel.
///
/// Only requests and responses are correlated; `Metrics` and `Error` are
/// unsolicited pushes applied by overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CollectorMessage {
    Request(CollectorRequest),
    Response(CollectorResponse),
    Metrics { data: LiveMetrics },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let msg = CollectorMessage::Request(CollectorRequest {
            id: 3,
            action: CollectorAction::SetInterval,
            data: Some(json!(750)),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "id": 3, "action": "setInterval", "data": 750})
        );
    }

    #[test]
    fn test_response_wire_shape() {
        let raw = r#"{"type":"response","id":9,"success":false,"error":"boom"}"#;
        let msg: CollectorMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, CollectorMessage::Response(CollectorResponse::err(9, "boom")));
    }

    #[test]
    fn test_error_push_wire_shape() {
        let msg = CollectorMessage::Error {
            message: "sampling failed".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "sampling failed"}));
    }
}
