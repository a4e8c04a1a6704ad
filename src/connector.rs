//! Subprocess data connector
//!
//! Spawns an MCP server as a child process and speaks line-delimited
//! JSON-RPC 2.0 over its stdin/stdout: initialize handshake on open,
//! tools/call round-trips while the session lives, stdin close plus a
//! bounded wait on teardown.
//!
//! Raw tool results are normalized into [`Payload`] at this boundary, so
//! nothing downstream inspects response shapes.

use crate::error::AuditError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Launch parameters for one connector. Read-only after construction.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl ConnectorConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// Normalized connector response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
}

impl Payload {
    pub fn into_text(self) -> String {
        match self {
            Payload::Text(text) => text,
        }
    }

    /// Normalize a raw tools/call result.
    ///
    /// Extracts the text of the first content block when the result is a
    /// block list; otherwise the raw value passes through as text.
    fn from_result(result: &Value) -> Payload {
        if let Some(blocks) = result.get("content").and_then(Value::as_array) {
            let first_text = blocks.iter().find_map(|block| {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    block.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            });
            if let Some(text) = first_text {
                return Payload::Text(text.to_string());
            }
        }

        match result.as_str() {
            Some(text) => Payload::Text(text.to_string()),
            None => Payload::Text(result.to_string()),
        }
    }
}

//
// ================= JSON-RPC envelopes =================
//

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcNotification {
    jsonrpc: &'static str,
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

//
// ================= Session =================
//

/// One live bridge to a connector subprocess.
///
/// Sessions are short-lived: open, issue one or two calls, close. The child
/// is killed on drop as a backstop for paths that never reach `close`.
#[derive(Debug)]
pub struct ConnectorSession {
    name: String,
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl ConnectorSession {
    /// Spawn the connector process and perform the initialize handshake.
    pub async fn open(name: &str, config: &ConnectorConfig) -> crate::Result<Self> {
        info!(connector = name, command = %config.command, "spawning connector");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // connector logs go to parent stderr
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AuditError::ConnectorError(format!(
                    "failed to spawn {} connector: {}. Is `{}` installed?",
                    name, e, config.command
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AuditError::ConnectorError(format!("failed to capture {} connector stdin", name))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AuditError::ConnectorError(format!("failed to capture {} connector stdout", name))
        })?;

        let mut session = Self {
            name: name.to_string(),
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        };

        timeout(HANDSHAKE_TIMEOUT, session.initialize())
            .await
            .map_err(|_| {
                AuditError::ConnectorError(format!("{} connector handshake timed out", name))
            })??;

        Ok(session)
    }

    async fn initialize(&mut self) -> crate::Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "fiscalpulse",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        let server_name = result
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(connector = %self.name, server = server_name, "connector is ready");

        self.notify("notifications/initialized", json!({})).await
    }

    /// Issue one tool call and normalize its result.
    pub async fn call_tool(&mut self, tool: &str, arguments: Value) -> crate::Result<Payload> {
        let params = json!({ "name": tool, "arguments": arguments });

        let result = timeout(CALL_TIMEOUT, self.request("tools/call", params))
            .await
            .map_err(|_| {
                AuditError::ConnectorError(format!(
                    "{} connector call to {} timed out",
                    self.name, tool
                ))
            })??;

        Ok(Payload::from_result(&result))
    }

    async fn request(&mut self, method: &str, params: Value) -> crate::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        self.write_line(&serde_json::to_string(&request)?).await?;

        loop {
            let line = self.read_line().await?;
            if line.trim().is_empty() {
                continue;
            }

            let response: RpcResponse = match serde_json::from_str(line.trim()) {
                Ok(response) => response,
                Err(e) => {
                    return Err(AuditError::ConnectorError(format!(
                        "invalid {} connector response: {} (got: {})",
                        self.name,
                        e,
                        &line[..line.len().min(200)]
                    )));
                }
            };

            // Server-initiated notifications and unrelated ids are skipped.
            if response.id != Some(id) {
                debug!(connector = %self.name, "skipping non-matching connector message");
                continue;
            }

            if let Some(error) = response.error {
                return Err(AuditError::ConnectorError(format!(
                    "{} connector returned error {}: {}",
                    self.name, error.code, error.message
                )));
            }

            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> crate::Result<()> {
        let notification = RpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn write_line(&mut self, line: &str) -> crate::Result<()> {
        let mut buf = line.as_bytes().to_vec();
        buf.push(b'\n');

        self.stdin.write_all(&buf).await.map_err(|e| {
            AuditError::ConnectorError(format!(
                "failed to write to {} connector stdin: {}",
                self.name, e
            ))
        })?;
        self.stdin.flush().await.map_err(|e| {
            AuditError::ConnectorError(format!(
                "failed to flush {} connector stdin: {}",
                self.name, e
            ))
        })
    }

    async fn read_line(&mut self) -> crate::Result<String> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await.map_err(|e| {
            AuditError::ConnectorError(format!("{} connector read error: {}", self.name, e))
        })?;

        if bytes == 0 {
            return Err(AuditError::ConnectorError(format!(
                "{} connector closed stdout unexpectedly",
                self.name
            )));
        }

        Ok(line)
    }

    /// Release the connector: close stdin, wait briefly, kill on overrun.
    pub async fn close(self) {
        let ConnectorSession {
            name,
            mut child,
            mut stdin,
            ..
        } = self;

        // Closing stdin signals the server to exit.
        let _ = stdin.shutdown().await;
        drop(stdin);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!(connector = %name, ?status, "connector exited"),
            Ok(Err(e)) => warn!(connector = %name, "connector wait error: {}", e),
            Err(_) => {
                warn!(connector = %name, "connector did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stub connector: answers the handshake and one tools/call, then exits
    /// when stdin closes.
    const STUB_SCRIPT: &str = r#"
read -r _init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"stub","version":"0"}}}'
read -r _initialized
read -r _call
echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"stub rows"}]}}'
read -r _eof
"#;

    fn stub_config(script: &str) -> ConnectorConfig {
        ConnectorConfig::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_session_round_trip_against_stub() {
        let config = stub_config(STUB_SCRIPT);
        let mut session = ConnectorSession::open("stub", &config).await.unwrap();

        let payload = session
            .call_tool("query", json!({"sql": "SELECT 1;"}))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Text("stub rows".to_string()));

        session.close().await;
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_as_connector_error() {
        const ERROR_SCRIPT: &str = r#"
read -r _init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"stub","version":"0"}}}'
read -r _initialized
read -r _call
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"relation does not exist"}}'
read -r _eof
"#;

        let config = stub_config(ERROR_SCRIPT);
        let mut session = ConnectorSession::open("stub", &config).await.unwrap();

        let error = session
            .call_tool("query", json!({"sql": "SELECT 1;"}))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("relation does not exist"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_connector_error() {
        let config = ConnectorConfig::new("nonexistent-connector-binary", vec![]);
        let error = ConnectorSession::open("postgres", &config)
            .await
            .unwrap_err();

        assert!(matches!(error, AuditError::ConnectorError(_)));
        assert!(error.to_string().contains("failed to spawn"));
    }

    #[test]
    fn test_payload_extracts_first_text_block() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
            ]
        });
        assert_eq!(
            Payload::from_result(&result),
            Payload::Text("first".to_string())
        );
    }

    #[test]
    fn test_payload_passes_raw_text_through() {
        assert_eq!(
            Payload::from_result(&json!("plain result")),
            Payload::Text("plain result".to_string())
        );
    }

    #[test]
    fn test_payload_stringifies_unexpected_shapes() {
        let payload = Payload::from_result(&json!({"rows": 2}));
        assert_eq!(payload, Payload::Text("{\"rows\":2}".to_string()));
    }
}
