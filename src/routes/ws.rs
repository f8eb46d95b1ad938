//! WebSocket handler — request/response RPC over frames.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID, sends `session:connected`, then reads
//! frames until the socket closes. Each request frame is decoded, dispatched
//! by syscall prefix, and answered with exactly one `done` or `error` frame.
//!
//! Handler functions only translate fields and call the registry; they
//! return an `Outcome` and the dispatch layer builds the reply frame.
//! Binary messages carry protobuf frames; text messages carry the same
//! frame as JSON. Replies use the encoding of the request.
//!
//! SYSCALLS
//! ========
//! - `chat:create` — `user_ids: [id]` → `done` with `chat_id` and `id`
//! - `chat:delete` — `id` (or frame `chat_id`) → `done`
//! - `chat:send`   — `chat_id`, `from_user_id`, `text`, `created_at` → `done`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services::chat::{self, ChatError, ChatId, UserId};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// the reply frame; handlers never build success frames themselves.
#[derive(Debug)]
enum Outcome {
    /// Send empty done to sender.
    Done,
    /// Send done+data to sender, tagged with the chat it concerns.
    ReplyForChat { chat_id: ChatId, data: Data },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Binary,
    Json,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome, Encoding::Binary).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    while let Some(msg) = socket.recv().await {
        let Ok(msg) = msg else { break };
        let (reply, encoding) = match msg {
            Message::Binary(bytes) => (process_inbound_bytes(&state, client_id, &bytes).await, Encoding::Binary),
            Message::Text(text) => (process_inbound_text(&state, client_id, text.as_str()).await, Encoding::Json),
            Message::Close(_) => break,
            _ => continue,
        };
        if send_frame(&mut socket, &reply, encoding).await.is_err() {
            break;
        }
    }

    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode one binary (protobuf) frame, dispatch it, and return the reply.
async fn process_inbound_bytes(state: &AppState, client_id: Uuid, bytes: &[u8]) -> Frame {
    let wire = match frames::decode_frame(bytes) {
        Ok(wire) => wire,
        Err(e) => return gateway_error(client_id, &e),
    };
    process_wire_frame(state, client_id, wire).await
}

/// Decode one JSON frame, dispatch it, and return the reply.
async fn process_inbound_text(state: &AppState, client_id: Uuid, text: &str) -> Frame {
    let wire: frames::Frame = match serde_json::from_str(text) {
        Ok(wire) => wire,
        Err(e) => return gateway_error(client_id, &format!("invalid json: {e}")),
    };
    process_wire_frame(state, client_id, wire).await
}

async fn process_wire_frame(state: &AppState, client_id: Uuid, wire: frames::Frame) -> Frame {
    match Frame::try_from(wire) {
        Ok(req) => process_frame(state, client_id, &req).await,
        Err(e) => gateway_error(client_id, &e),
    }
}

async fn process_frame(state: &AppState, client_id: Uuid, req: &Frame) -> Frame {
    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    if req.status != Status::Request {
        return req.error(format!("expected a request frame, got {:?}", req.status));
    }

    let result = match req.prefix() {
        "chat" => handle_chat(state, req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Done) => req.done(),
        Ok(Outcome::ReplyForChat { chat_id, data }) => req.done_with(data).with_chat_id(chat_id),
        Err(err_frame) => err_frame,
    }
}

fn gateway_error(client_id: Uuid, err: &impl std::fmt::Display) -> Frame {
    warn!(%client_id, error = %err, "ws: invalid inbound frame");
    Frame::request("gateway:error", Data::new()).with_data("message", err.to_string())
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            let user_ids = parse_user_ids(&req.data).map_err(|e| req.error_from(&e))?;
            match state.registry.create_chat(&user_ids).await {
                Ok(chat_id) => {
                    let mut data = Data::new();
                    data.insert("id".into(), Value::String(chat_id.to_string()));
                    Ok(Outcome::ReplyForChat { chat_id, data })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "delete" => {
            let chat_id = optional_id(&req.data, "id")
                .map_err(|e| req.error_from(&e))?
                .or(req.chat_id)
                .filter(|id| *id != 0);
            let Some(chat_id) = chat_id else {
                return Err(req.error_from(&ChatError::InvalidInput("id required".into())));
            };
            match state.registry.delete_chat(chat_id).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "send" => {
            let message = parse_send(req).map_err(|e| req.error_from(&e))?;
            match state
                .registry
                .post_message(message.chat_id, message.sender_id, message.text, message.created_at)
                .await
            {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// FIELD PARSING
// =============================================================================

/// Fields of a `chat:send` request. Unset values are zero/empty/`None`;
/// the registry reports which one is missing.
struct SendFields<'a> {
    chat_id: ChatId,
    sender_id: UserId,
    text: &'a str,
    created_at: Option<time::OffsetDateTime>,
}

fn parse_send(req: &Frame) -> Result<SendFields<'_>, ChatError> {
    let chat_id = optional_id(&req.data, "chat_id")?.or(req.chat_id).unwrap_or(0);
    let sender_id = optional_id(&req.data, "from_user_id")?.unwrap_or(0);
    let text = match req.data.get("text") {
        None | Some(Value::Null) => "",
        Some(Value::String(text)) => text.as_str(),
        Some(_) => return Err(ChatError::InvalidInput("text must be a string".into())),
    };
    let created_at = match req.data.get("created_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(chat::parse_created_at(raw)?),
        Some(_) => return Err(ChatError::InvalidInput("created_at must be an RFC 3339 timestamp".into())),
    };
    Ok(SendFields { chat_id, sender_id, text, created_at })
}

fn parse_user_ids(data: &Data) -> Result<Vec<UserId>, ChatError> {
    let items = match data.get("user_ids") {
        None | Some(Value::Null) => return Err(ChatError::InvalidInput("user_ids required".into())),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ChatError::InvalidInput("user_ids must be an array".into())),
    };
    items
        .iter()
        .map(|v| parse_id_value(v).ok_or_else(|| ChatError::InvalidInput(format!("user_ids: invalid id {v}"))))
        .collect()
}

/// Read an optional identifier field. Missing or null is `None`; anything
/// other than an integer or a decimal string is invalid.
fn optional_id(data: &Data, key: &str) -> Result<Option<i64>, ChatError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_id_value(v)
            .map(Some)
            .ok_or_else(|| ChatError::InvalidInput(format!("{key} must be an integer id"))),
    }
}

/// 63-bit ids do not survive a float round trip, so decimal strings are
/// accepted alongside JSON integers.
fn parse_id_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame, encoding: Encoding) -> Result<(), ()> {
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    let wire = frames::Frame::from(frame);
    let msg = match encoding {
        Encoding::Binary => Message::Binary(frames::encode_frame(&wire).into()),
        Encoding::Json => match serde_json::to_string(&wire) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                warn!(error = %e, "ws: failed to serialize frame");
                return Err(());
            }
        },
    };
    socket.send(msg).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
