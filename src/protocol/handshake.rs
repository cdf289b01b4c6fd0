//! Post-open handshakes.
//!
//! A session counts as connected only after its handshake completes.
//!
//! | Handshake | Exchange |
//! |-----------|----------|
//! | [`InitializeHandshake`] | `initialize` request with the init payload, then `initialized` |
//! | [`ReadyHandshake`] | waits for one server notification, e.g. `ready` |
//! | [`NoHandshake`] | nothing |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};

use super::client::ProtocolClient;

// ============================================================================
// Handshake
// ============================================================================

/// Exchange run on a freshly opened client.
pub trait Handshake: Send + Sync + fmt::Debug + 'static {
    /// Starts the handshake.
    ///
    /// Called before the client starts listening, so anything registered
    /// synchronously here sees the first inbound frame. The returned future
    /// runs once the client listens; the caller bounds it with a timeout.
    fn start(&self, client: &ProtocolClient, init: &Value) -> BoxFuture<'static, Result<()>>;
}

// ============================================================================
// InitializeHandshake
// ============================================================================

/// Request/acknowledge handshake used by language servers.
#[derive(Debug, Clone)]
pub struct InitializeHandshake {
    /// Request method.
    request_method: String,
    /// Acknowledgement notification.
    ack_method: String,
}

impl Default for InitializeHandshake {
    fn default() -> Self {
        Self::new("initialize", "initialized")
    }
}

impl InitializeHandshake {
    /// Creates a handshake with custom method names.
    #[must_use]
    pub fn new(request_method: impl Into<String>, ack_method: impl Into<String>) -> Self {
        Self {
            request_method: request_method.into(),
            ack_method: ack_method.into(),
        }
    }
}

impl Handshake for InitializeHandshake {
    fn start(&self, client: &ProtocolClient, init: &Value) -> BoxFuture<'static, Result<()>> {
        let client = client.clone();
        let init = init.clone();
        let request_method = self.request_method.clone();
        let ack_method = self.ack_method.clone();

        async move {
            let reply = client
                .request(&request_method, init)
                .await
                .map_err(|e| Error::handshake_failed(format!("{request_method}: {e}")))?;

            client
                .notify(&ack_method, json!({}))
                .map_err(|e| Error::handshake_failed(format!("{ack_method}: {e}")))?;

            let server = server_name(&reply);
            debug!(session = %client.session_id(), server, "Initialize handshake completed");
            Ok(())
        }
        .boxed()
    }
}

// ============================================================================
// ReadyHandshake
// ============================================================================

/// Waits for a server-sent notification announcing readiness.
#[derive(Debug, Clone)]
pub struct ReadyHandshake {
    /// Notification method that signals readiness.
    method: String,
}

impl ReadyHandshake {
    /// Creates a handshake waiting for `method`.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

impl Handshake for ReadyHandshake {
    fn start(&self, client: &ProtocolClient, _init: &Value) -> BoxFuture<'static, Result<()>> {
        let ready = client.wait_notification(self.method.clone());
        let method = self.method.clone();
        let session_id = client.session_id().clone();

        async move {
            let params = ready
                .await
                .map_err(|_| Error::handshake_failed(format!("closed before '{method}'")))?;
            debug!(session = %session_id, %method, ?params, "Ready handshake completed");
            Ok(())
        }
        .boxed()
    }
}

// ============================================================================
// NoHandshake
// ============================================================================

/// Treats the session as connected as soon as the transport opens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandshake;

impl Handshake for NoHandshake {
    fn start(&self, _client: &ProtocolClient, _init: &Value) -> BoxFuture<'static, Result<()>> {
        async { Ok(()) }.boxed()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Server name announced in an `initialize` reply.
fn server_name(reply: &Value) -> &str {
    reply
        .pointer("/serverInfo/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use crate::identifiers::SessionId;
    use crate::protocol::{Codec, JsonRpcCodec, NotificationRouter, TaggedCodec};
    use crate::transport::{MemoryFactory, MemoryPeer, Transport, TransportEvents, TransportFactory};

    async fn client_with_peer(codec: Arc<dyn Codec>) -> (ProtocolClient, MemoryPeer, TransportEvents) {
        let (factory, mut acceptor) = MemoryFactory::new();
        let transport = factory.create();
        let events = transport.open("mem://x").await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        let client = ProtocolClient::new(
            SessionId::new("s"),
            transport,
            codec,
            NotificationRouter::new(),
            Duration::from_secs(5),
        );
        (client, peer, events)
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let (client, mut peer, events) = client_with_peer(Arc::new(JsonRpcCodec)).await;
        let init = json!({ "rootUri": "file:///work" });

        let handshake = InitializeHandshake::default().start(&client, &init);
        let _disconnect = client.listen(events);
        let task = tokio::spawn(handshake);

        let request = peer.recv_json().await.unwrap();
        assert_eq!(request["method"], json!("initialize"));
        assert_eq!(request["params"], init);
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": { "capabilities": {}, "serverInfo": { "name": "pyright" } }
        }));

        task.await.unwrap().unwrap();
        let ack = peer.recv_json().await.unwrap();
        assert_eq!(ack["method"], json!("initialized"));
    }

    #[tokio::test]
    async fn test_initialize_handshake_error_reply() {
        let (client, mut peer, events) = client_with_peer(Arc::new(JsonRpcCodec)).await;

        let handshake = InitializeHandshake::default().start(&client, &Value::Null);
        let _disconnect = client.listen(events);
        let task = tokio::spawn(handshake);

        let request = peer.recv_json().await.unwrap();
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": -32603, "message": "venv missing" }
        }));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed { .. }));
    }

    #[tokio::test]
    async fn test_ready_handshake_sees_first_frame() {
        let (client, peer, events) = client_with_peer(Arc::new(TaggedCodec)).await;

        // The frame is queued before the client listens.
        peer.send(r#"{"type":"ready"}"#);

        let handshake = ReadyHandshake::new("ready").start(&client, &Value::Null);
        let _disconnect = client.listen(events);
        handshake.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_handshake_fails_on_close() {
        let (client, peer, events) = client_with_peer(Arc::new(TaggedCodec)).await;

        let handshake = ReadyHandshake::new("ready").start(&client, &Value::Null);
        let _disconnect = client.listen(events);
        peer.close(4002, "shell failed to start");

        assert!(matches!(
            handshake.await,
            Err(Error::HandshakeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_handshake() {
        let (client, _peer, _events) = client_with_peer(Arc::new(JsonRpcCodec)).await;
        NoHandshake.start(&client, &Value::Null).await.unwrap();
    }

    #[test]
    fn test_server_name_from_reply() {
        assert_eq!(server_name(&json!({ "serverInfo": { "name": "ruff" } })), "ruff");
        assert_eq!(server_name(&json!({ "capabilities": {} })), "unknown");
    }
}
