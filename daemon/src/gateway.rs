/// Query/control boundary between the UI process and the engine.
///
/// Requests are validated here and turned into typed [`Request`] values before
/// they reach the engine. A [`Gateway`] forwards them into the daemon event
/// loop and waits for the reply, so every call is serialized with status
/// events and checkpoints.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::event::DaemonEvent;
use crate::ledger::GameId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetAllOfflineTimes,
    GetOfflineTime { game_id: GameId },
    GetTrackingStatus,
    SetTrackingEnabled { enabled: bool },
    /// `None` clears every game.
    ClearOfflineData { game_id: Option<GameId> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            result: None,
            error: None,
        }
    }

    pub fn ok_with<T: Serialize>(result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure(format!("failed to encode result: {e}")),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Result payload of `get_tracking_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub enabled: bool,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Game ids arrive as strings or as bare numbers (store app ids).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawGameId {
    Text(String),
    Number(u64),
}

impl RawGameId {
    fn into_game_id(self) -> Result<GameId, String> {
        let id = match self {
            RawGameId::Text(s) => s.trim().to_string(),
            RawGameId::Number(n) => n.to_string(),
        };
        if id.is_empty() {
            return Err("game_id must not be empty".to_string());
        }
        Ok(GameId::new(id))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetEnabledParams {
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GameParams {
    game_id: RawGameId,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClearParams {
    #[serde(default)]
    game_id: Option<RawGameId>,
}

fn params<T: for<'de> Deserialize<'de>>(method: &str, value: Value) -> Result<T, String> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| format!("invalid params for {method}: {e}"))
}

impl Request {
    /// Parses and validates one JSON request of the form
    /// `{"method": "...", "params": {...}}`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let envelope: Envelope =
            serde_json::from_str(input).map_err(|e| format!("malformed request: {e}"))?;
        let method = envelope.method.as_str();

        match method {
            "get_all_offline_times" => Ok(Request::GetAllOfflineTimes),
            "get_tracking_status" => Ok(Request::GetTrackingStatus),
            "get_offline_time" => {
                let p: GameParams = params(method, envelope.params)?;
                Ok(Request::GetOfflineTime {
                    game_id: p.game_id.into_game_id()?,
                })
            }
            "set_tracking_enabled" => {
                let p: SetEnabledParams = params(method, envelope.params)?;
                Ok(Request::SetTrackingEnabled { enabled: p.enabled })
            }
            "clear_offline_data" => {
                let p: ClearParams = params(method, envelope.params)?;
                let game_id = p.game_id.map(RawGameId::into_game_id).transpose()?;
                Ok(Request::ClearOfflineData { game_id })
            }
            other => Err(format!("unknown method: {other}")),
        }
    }
}

// ── Gateway handle ────────────────────────────────────────────────────────────

/// Cloneable handle used by transports to reach the engine.
#[derive(Clone)]
pub struct Gateway {
    tx: mpsc::Sender<DaemonEvent>,
}

impl Gateway {
    pub fn new(tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self { tx }
    }

    /// Sends `request` to the engine and waits for its answer.
    pub async fn call(&self, request: Request) -> Response {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(DaemonEvent::Request(request, reply_tx))
            .await
            .is_err()
        {
            return Response::failure("engine is not running");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Response::failure("engine dropped the request"))
    }

    /// Handles one raw JSON request line. Invalid input is answered directly
    /// and never reaches the engine.
    pub async fn handle_line(&self, line: &str) -> Response {
        match Request::parse(line) {
            Ok(request) => self.call(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected gateway request");
                Response::failure(e)
            }
        }
    }
}

// ── Line transport ────────────────────────────────────────────────────────────

/// Answers one JSON request per input line with one JSON response line.
/// Lines that are not UTF-8 are answered with a failure like any other bad
/// request. Returns when the input reaches EOF.
pub async fn serve<R, W>(gateway: &Gateway, mut reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => gateway.handle_line(line.trim_end()).await,
            Err(_) => {
                tracing::warn!(len = buf.len(), "Rejected gateway request that is not UTF-8");
                Response::failure("request is not valid UTF-8")
            }
        };

        let mut out = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"{e}"}}"#));
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
}

/// Serves the gateway on stdin/stdout for a UI that spawned the daemon as a
/// child process. EOF on stdin means the UI is gone and shuts the daemon down.
pub async fn serve_stdio(gateway: Gateway, tx: mpsc::Sender<DaemonEvent>) {
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    match serve(&gateway, reader, tokio::io::stdout()).await {
        Ok(()) => tracing::info!("Gateway input closed"),
        Err(e) => tracing::error!(error = %e, "Gateway transport failed"),
    }
    let _ = tx.send(DaemonEvent::Shutdown).await;
}
