//! Newline-delimited JSON-RPC 2.0 tool server over stdin/stdout.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::tools::dispatch::ToolDispatcher;

/// Protocol revision announced on `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    /// `None` only when the field is absent; `"id": null` is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present_id")]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn present_id<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Stdio transport for the tool dispatcher.
pub struct StdioServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl StdioServer {
    /// Create a server over a shared dispatcher.
    #[must_use]
    pub const fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serve stdin/stdout until stdin closes.
    ///
    /// # Errors
    /// Returns an error if reading or writing the streams fails.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Serving tools over stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve one request per line from `reader`, writing replies to `writer`.
    ///
    /// # Errors
    /// Returns an error if reading or writing fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(reply) = self.handle_line(&line).await {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        debug!("Stdin closed, stopping stdio server");
        Ok(())
    }

    /// Handle one raw line; `None` when nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Err(err) => Some(RpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {err}"))),
            Ok(raw) => match serde_json::from_value::<RpcRequest>(raw) {
                Err(err) => Some(RpcResponse::error(
                    Value::Null,
                    INVALID_REQUEST,
                    format!("Invalid request: {err}"),
                )),
                Ok(request) => self.handle(request).await,
            },
        };

        response.and_then(|response| match serde_json::to_string(&response) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                warn!(%err, "Failed to encode JSON-RPC response");
                None
            }
        })
    }

    async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        // Notifications carry no id and never get a reply.
        let id = request.id?;
        debug!(method = %request.method, "JSON-RPC request");

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "fastintercom",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => RpcResponse::result(id, json!({})),
            "tools/list" => RpcResponse::result(
                id,
                json!({ "tools": self.dispatcher.definitions() }),
            ),
            "tools/call" => match serde_json::from_value::<CallParams>(request.params) {
                Ok(params) => {
                    let reply = self.dispatcher.call(&params.name, &params.arguments).await;
                    RpcResponse::result(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": reply.text }],
                            "isError": reply.is_error
                        }),
                    )
                }
                Err(err) => RpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {err}")),
            },
            other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        Some(response)
    }
}
