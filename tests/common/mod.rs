//! Shared utilities for integration tests.
//!
//! Provides common functionality used across all test files:
//! - Logging initialization
//! - Scripted language server and shell peers

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use resilient_session::{BackoffConfig, FixedJitter, MemoryPeer, SessionOptions};

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing for tests; honors `RUST_LOG`.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resilient_session=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Language server options with deterministic backoff.
pub fn language_server_options(max_attempts: u32) -> SessionOptions {
    SessionOptions::language_server()
        .with_backoff(BackoffConfig::new(max_attempts, 1000, 30_000, 0.3).unwrap())
        .with_jitter(FixedJitter::new(0.5))
        .with_init_options(json!({ "processId": null, "capabilities": {} }))
}

/// Answers `initialize` and consumes `initialized`. Returns the init params.
pub async fn serve_initialize(peer: &mut MemoryPeer) -> Value {
    let request = peer.recv_json().await.expect("initialize request");
    assert_eq!(request["method"], "initialize");

    peer.send_json(&json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": {
            "capabilities": { "hoverProvider": true },
            "serverInfo": { "name": "fake-lsp" }
        }
    }));

    let ack = peer.recv_json().await.expect("initialized notification");
    assert_eq!(ack["method"], "initialized");
    assert!(ack.get("id").is_none());

    request["params"].clone()
}

/// Answers the next request with `result`. Returns the request.
pub async fn answer_next(peer: &mut MemoryPeer, result: Value) -> Value {
    let request = peer.recv_json().await.expect("request");
    peer.send_json(&json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }));
    request
}
