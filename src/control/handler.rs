// src/control/handler.rs
// Reads control requests line by line and drives the supervisor

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::protocol::{ControlRequest, ControlResponse, ControlStatus};
use crate::error::{GraphHostError, Result};
use crate::supervisor::{PingRequest, StartRequest, StopRequest, WorkerSupervisor};

/// Longest accepted request line (1 MB)
const MAX_LINE_SIZE: usize = 1_048_576;

/// Start materializes files and spawns a process; everything else is bookkeeping.
fn op_timeout(op: &str) -> Duration {
    match op {
        "start" => Duration::from_secs(30),
        _ => Duration::from_secs(5),
    }
}

fn params<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| GraphHostError::InvalidRequest(format!("invalid params: {e}")))
}

/// Run one operation
pub async fn dispatch(
    supervisor: &WorkerSupervisor,
    op: &str,
    params_value: serde_json::Value,
) -> Result<serde_json::Value> {
    match op {
        "start" => {
            let request: StartRequest = params(params_value)?;
            let info = supervisor.start(request).await?;
            Ok(serde_json::to_value(info)?)
        }
        "stop" => {
            let request: StopRequest = params(params_value)?;
            supervisor.stop(&request.channel_name, request.request_id.as_deref())?;
            Ok(serde_json::json!({ "channel_name": request.channel_name }))
        }
        "ping" => {
            let request: PingRequest = params(params_value)?;
            supervisor.ping(&request.channel_name)?;
            Ok(serde_json::json!({ "channel_name": request.channel_name }))
        }
        "list" => Ok(serde_json::to_value(supervisor.list())?),
        other => Err(GraphHostError::InvalidRequest(format!(
            "unknown op: {other}"
        ))),
    }
}

/// Answer one parsed request, never failing
pub async fn handle_request(supervisor: &WorkerSupervisor, request: ControlRequest) -> ControlResponse {
    let ControlRequest { op, id, params } = request;
    debug!(op = %op, id = %id, "Control request");

    match tokio::time::timeout(op_timeout(&op), dispatch(supervisor, &op, params)).await {
        Ok(Ok(result)) => ControlResponse::success(id, result),
        Ok(Err(e)) => {
            if !e.is_client_error() {
                warn!(op = %op, id = %id, error = %e, "Control request failed");
            }
            ControlResponse::from_error(id, &e)
        }
        Err(_) => ControlResponse::failure(id, ControlStatus::Internal, "timeout"),
    }
}

/// Serve requests from `reader` until EOF, one response line per request line
pub async fn serve_stream<R, W>(reader: R, mut writer: W, supervisor: &WorkerSupervisor) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);

    loop {
        let mut buf = Vec::new();
        let mut too_large = false;
        // Bounded read: an oversized line is skipped, not buffered.
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            let newline = available.iter().position(|&b| b == b'\n');
            let end = newline.map(|p| p + 1).unwrap_or(available.len());
            if !too_large {
                if buf.len() + end > MAX_LINE_SIZE {
                    too_large = true;
                    buf.clear();
                } else {
                    buf.extend_from_slice(&available[..end]);
                }
            }
            reader.consume(end);
            if newline.is_some() {
                break;
            }
        }

        if buf.is_empty() && !too_large {
            // EOF
            return Ok(());
        }

        let response = if too_large {
            ControlResponse::failure(
                String::new(),
                ControlStatus::Validation,
                format!("request too large (max {MAX_LINE_SIZE} bytes)"),
            )
        } else {
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ControlRequest>(line) {
                Ok(request) => handle_request(supervisor, request).await,
                Err(e) => ControlResponse::failure(
                    String::new(),
                    ControlStatus::Validation,
                    format!("parse error: {e}"),
                ),
            }
        };

        write_response(&mut writer, &response).await?;
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ControlResponse,
) -> std::io::Result<()> {
    let mut json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":"","ok":false,"status":"internal","error":"serialize error"}"#.to_string()
    });
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}
