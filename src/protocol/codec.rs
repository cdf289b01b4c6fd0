//! Wire formats.
//!
//! | Codec | Frames | Requests |
//! |-------|--------|----------|
//! | [`JsonRpcCodec`] | JSON-RPC 2.0 objects | yes |
//! | [`TaggedCodec`] | `{"type": "...", ...}` objects | no |
//!
//! # JSON-RPC Classification
//!
//! | Keys present | Decoded as |
//! |--------------|------------|
//! | `method` + `id` | [`Incoming::Request`] |
//! | `method` | [`Incoming::Notification`] |
//! | `id` + `result` or `error` | [`Incoming::Response`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::message::{Incoming, Notification, RpcError};

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version tag.
const JSONRPC_VERSION: &str = "2.0";

/// Discriminator key of tagged frames.
const TAG_KEY: &str = "type";

/// Key used for non-object payloads of tagged frames.
const TAGGED_DATA_KEY: &str = "data";

// ============================================================================
// Codec
// ============================================================================

/// Encodes outbound messages and classifies inbound frames.
pub trait Codec: Send + Sync + fmt::Debug + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Encodes a request.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] if the format has no request/response pairing.
    fn encode_request(&self, id: RequestId, method: &str, params: &Value) -> Result<String>;

    /// Encodes a notification.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] if the payload cannot be serialized.
    fn encode_notification(&self, method: &str, params: &Value) -> Result<String>;

    /// Encodes the answer to a peer-initiated request.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] if the format has no request/response pairing.
    fn encode_response(&self, id: &Value, outcome: &std::result::Result<Value, RpcError>)
    -> Result<String>;

    /// Decodes one inbound frame.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] or [`Error::Protocol`] for frames that do not fit the format.
    fn decode(&self, frame: &str) -> Result<Incoming>;
}

// ============================================================================
// JsonRpcCodec
// ============================================================================

/// JSON-RPC 2.0 codec, used by language servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcCodec;

impl Codec for JsonRpcCodec {
    fn name(&self) -> &'static str {
        "json-rpc"
    }

    fn encode_request(&self, id: RequestId, method: &str, params: &Value) -> Result<String> {
        let mut message = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
        });
        if !params.is_null() {
            message["params"] = params.clone();
        }
        Ok(serde_json::to_string(&message)?)
    }

    fn encode_notification(&self, method: &str, params: &Value) -> Result<String> {
        let mut message = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        });
        if !params.is_null() {
            message["params"] = params.clone();
        }
        Ok(serde_json::to_string(&message)?)
    }

    fn encode_response(
        &self,
        id: &Value,
        outcome: &std::result::Result<Value, RpcError>,
    ) -> Result<String> {
        let message = match outcome {
            Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
        };
        Ok(serde_json::to_string(&message)?)
    }

    fn decode(&self, frame: &str) -> Result<Incoming> {
        let mut object: Map<String, Value> = serde_json::from_str(frame)?;

        let id = object.remove("id");
        let params = object.remove("params").unwrap_or(Value::Null);

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(Error::protocol("JSON-RPC method must be a string"));
            };
            return Ok(match id {
                Some(id) if !id.is_null() => Incoming::Request { id, method, params },
                _ => Incoming::Notification(Notification { method, params }),
            });
        }

        let id = id
            .as_ref()
            .and_then(Value::as_u64)
            .map(RequestId::new)
            .ok_or_else(|| Error::protocol(format!("Response without usable id: {frame}")))?;

        if let Some(error) = object.remove("error") {
            let error: RpcError = serde_json::from_value(error)?;
            return Ok(Incoming::Response {
                id,
                outcome: Err(error),
            });
        }

        match object.remove("result") {
            Some(result) => Ok(Incoming::Response {
                id,
                outcome: Ok(result),
            }),
            None => Err(Error::protocol(format!(
                "Response {id} has neither result nor error"
            ))),
        }
    }
}

// ============================================================================
// TaggedCodec
// ============================================================================

/// Codec for `{"type": "...", ...}` frames, used by interactive shells.
///
/// Outbound notifications merge object payloads into the frame
/// (`resize` → `{"type":"resize","cols":80,"rows":24}`); other payloads go
/// under `data`. Inbound frames become notifications whose params are the
/// frame without its `type` key.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaggedCodec;

impl Codec for TaggedCodec {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn encode_request(&self, _id: RequestId, method: &str, _params: &Value) -> Result<String> {
        Err(Error::unsupported(format!(
            "request '{method}' over tagged frames"
        )))
    }

    fn encode_notification(&self, method: &str, params: &Value) -> Result<String> {
        let mut frame = Map::new();
        frame.insert(TAG_KEY.to_string(), Value::String(method.to_string()));
        match params {
            Value::Null => {}
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key != TAG_KEY {
                        frame.insert(key.clone(), value.clone());
                    }
                }
            }
            other => {
                frame.insert(TAGGED_DATA_KEY.to_string(), other.clone());
            }
        }
        Ok(serde_json::to_string(&Value::Object(frame))?)
    }

    fn encode_response(
        &self,
        _id: &Value,
        _outcome: &std::result::Result<Value, RpcError>,
    ) -> Result<String> {
        Err(Error::unsupported("response over tagged frames"))
    }

    fn decode(&self, frame: &str) -> Result<Incoming> {
        let mut object: Map<String, Value> = serde_json::from_str(frame)?;
        let method = match object.remove(TAG_KEY) {
            Some(Value::String(tag)) => tag,
            _ => return Err(Error::protocol("Tagged frame without string 'type'")),
        };
        Ok(Incoming::Notification(Notification {
            method,
            params: Value::Object(object),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
