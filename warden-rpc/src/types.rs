//! JSON-RPC 2.0 envelopes.
//!
//! Inbound requests are classified into a small tagged set (submission,
//! receipt query, opaque passthrough) by the router; the envelope types
//! here stay schema-light so unknown methods relay untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// The `jsonrpc` marker to echo back, defaulting to 2.0.
    pub fn version(&self) -> String {
        self.jsonrpc.clone().unwrap_or_else(|| "2.0".to_string())
    }

    /// First positional parameter as a string, if present.
    pub fn first_param_str(&self) -> Option<&str> {
        self.params.as_array()?.first()?.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// The synthetic error returned for transactions the reviewer
    /// rejected: it models the sender's view once the real node would
    /// also reject the now-stale nonce.
    pub fn nonce_too_low(id: Value) -> Self {
        Self::error(id, -32000, "nonce too low")
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_omits_error_field() {
        let value = JsonRpcResponse::success(json!(1), json!("0xabc")).into_value();
        assert_eq!(value["result"], "0xabc");
        assert_eq!(value["jsonrpc"], "2.0");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_omits_result_field() {
        let value = JsonRpcResponse::error(json!(7), -32603, "boom").into_value();
        assert_eq!(value["error"]["code"], -32603);
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["id"], 7);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn nonce_too_low_has_the_expected_shape() {
        let value = JsonRpcResponse::nonce_too_low(json!(3)).into_value();
        assert_eq!(value["error"]["code"], -32000);
        assert_eq!(value["error"]["message"], "nonce too low");
    }

    #[test]
    fn request_parses_without_jsonrpc_marker() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "id": 1,
            "method": "eth_blockNumber",
            "params": []
        }))
        .unwrap();
        assert_eq!(req.version(), "2.0");
        assert!(req.first_param_str().is_none());
    }

    #[test]
    fn first_param_str_reads_positional_params() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "eth_sendRawTransaction",
            "params": ["0xdeadbeef"]
        }))
        .unwrap();
        assert_eq!(req.first_param_str(), Some("0xdeadbeef"));
    }
}
