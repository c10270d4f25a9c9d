//! JSON-RPC 2.0 request and response envelopes
//!
//! The sensor's configuration interface is JSON-RPC over the VSP link (or a
//! bench UART). Responses are modelled as a closed variant rather than an
//! open map: the sensor replies either `{"result": ...}`, sometimes with
//! extra named attributes at the top level, or `{"error": {...}}`.

use std::fmt;

use rand::Rng;
use serde_json::{json, Map, Value};

use crate::error::RpcError;

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

/// A JSON-RPC 2.0 request with a random numeric id.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    method: String,
    params: Option<Value>,
    id: u64,
}

impl RpcRequest {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            params: None,
            id: rand::thread_rng().gen_range(1..=999_999_999),
        }
    }

    /// Attach positional parameters; a bare value becomes a one-element
    /// array.
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(match params {
            Value::Array(_) => params,
            other => Value::Array(vec![other]),
        });
        self
    }

    /// Attach named parameters.
    pub fn named_params(mut self, fields: Map<String, Value>) -> Self {
        self.params = Some(Value::Object(fields));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn to_value(&self) -> Value {
        let mut request = json!({
            "jsonrpc": "2.0",
            "method": self.method,
            "id": self.id,
        });
        if let Some(params) = &self.params {
            request["params"] = params.clone();
        }
        request
    }
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// A parsed JSON-RPC response.
#[derive(Debug, Clone)]
pub enum RpcResponse {
    /// A result envelope. `fields` keeps the complete top-level object
    /// because attribute reads return their values as extra named members
    /// beside `result`.
    Ok {
        result: Value,
        fields: Map<String, Value>,
    },
    Error {
        code: i64,
        message: String,
    },
}

impl RpcResponse {
    /// Interpret a decoded JSON packet as a response envelope.
    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        let fields = value.as_object().ok_or(RpcError::Malformed)?;

        if let Some(error) = fields.get("error") {
            return Ok(Self::Error {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let result = fields.get("result").ok_or(RpcError::Malformed)?.clone();
        Ok(Self::Ok {
            result,
            fields: fields.clone(),
        })
    }

    /// True for the plain acknowledgment `{"result": "ok"}`.
    pub fn is_ok_literal(&self) -> bool {
        matches!(self, Self::Ok { result, .. } if result == "ok")
    }

    /// A named top-level field of a result envelope.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Ok { fields, .. } => fields.get(name),
            Self::Error { .. } => None,
        }
    }

    /// The result as an integer.
    pub fn result_i64(&self) -> Result<i64, RpcError> {
        match self {
            Self::Ok { result, .. } => result.as_i64().ok_or(RpcError::UnexpectedField("result")),
            Self::Error { .. } => Err(RpcError::UnexpectedField("result")),
        }
    }

    /// The result as a string.
    pub fn result_str(&self) -> Result<&str, RpcError> {
        match self {
            Self::Ok { result, .. } => result.as_str().ok_or(RpcError::UnexpectedField("result")),
            Self::Error { .. } => Err(RpcError::UnexpectedField("result")),
        }
    }

    /// The `[size, base64]` pair returned by log reads.
    pub fn result_log_pair(&self) -> Result<(usize, String), RpcError> {
        let Self::Ok { result, .. } = self else {
            return Err(RpcError::UnexpectedField("result"));
        };
        let pair = result.as_array().ok_or(RpcError::UnexpectedField("result"))?;
        let size = pair
            .first()
            .and_then(Value::as_u64)
            .ok_or(RpcError::UnexpectedField("result"))?;
        let data = pair
            .get(1)
            .and_then(Value::as_str)
            .ok_or(RpcError::UnexpectedField("result"))?;
        Ok((size as usize, data.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest::new("setEpoch").params(json!(1_573_838_481));
        let value = request.to_value();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "setEpoch");
        assert_eq!(value["params"], json!([1_573_838_481]));
        assert_eq!(value["id"], json!(request.id()));
    }

    #[test]
    fn test_request_named_params() {
        let mut fields = Map::new();
        fields.insert("lock".to_string(), json!(0));
        let value = RpcRequest::new("set").named_params(fields).to_value();
        assert_eq!(value["params"]["lock"], json!(0));
    }

    #[test]
    fn test_ok_response_with_attribute() {
        let packet = json!({"jsonrpc": "2.0", "id": 7, "result": "ok", "sensorName": "Test-10"});
        let response = RpcResponse::from_value(&packet).unwrap();
        assert!(response.is_ok_literal());
        assert_eq!(response.field("sensorName"), Some(&json!("Test-10")));
    }

    #[test]
    fn test_error_response() {
        let packet = json!({"jsonrpc": "2.0", "id": 7, "error": {"code": -32602, "message": "bad params"}});
        match RpcResponse::from_value(&packet).unwrap() {
            RpcResponse::Error { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("expected error variant, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_response() {
        assert!(RpcResponse::from_value(&json!({"jsonrpc": "2.0", "id": 7})).is_err());
        assert!(RpcResponse::from_value(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_log_pair_result() {
        let packet = json!({"result": [16, "kd7OXWsJAQCR3s5dwgsMAQ=="]});
        let response = RpcResponse::from_value(&packet).unwrap();
        let (size, data) = response.result_log_pair().unwrap();
        assert_eq!(size, 16);
        assert_eq!(data, "kd7OXWsJAQCR3s5dwgsMAQ==");
    }

    #[test]
    fn test_integer_result() {
        let response = RpcResponse::from_value(&json!({"result": 128})).unwrap();
        assert_eq!(response.result_i64().unwrap(), 128);
        assert!(!response.is_ok_literal());
    }
}
