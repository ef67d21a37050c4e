use super::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::domains::sessions::SessionAttachment;

/// `/ws/events`: structural events (worktree changes, idle transitions) as
/// JSON text frames. Inbound frames are ignored.
pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| events_loop(socket, state))
}

async fn events_loop(mut socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::debug!("event socket lagged, {missed} events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

/// `/ws/:id`: scrollback replay followed by live PTY output as binary
/// frames. Inbound frames are either a resize request or raw bytes for the
/// agent's stdin. When the process exits the socket closes normally, which
/// tells clients not to reconnect.
pub async fn terminal_ws(
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let attachment = match state.sessions.attach(&id) {
        Ok(attachment) => attachment,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    ws.on_upgrade(move |socket| terminal_loop(socket, state, id, attachment))
}

async fn terminal_loop(
    mut socket: WebSocket,
    state: AppState,
    id: String,
    mut attachment: SessionAttachment,
) {
    for chunk in attachment.scrollback.drain(..) {
        if socket.send(Message::Binary(chunk.to_vec())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            output = attachment.output.recv() => match output {
                Ok(data) => {
                    if socket.send(Message::Binary(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::debug!("terminal socket for {id} lagged, {missed} chunks dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = attachment.exited.changed() => {
                // Deliver whatever output is already buffered before the
                // normal close; the exit signal can win the race against
                // the process's final chunks.
                loop {
                    match attachment.output.try_recv() {
                        Ok(data) => {
                            if socket.send(Message::Binary(data.to_vec())).await.is_err() {
                                return;
                            }
                        }
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    })))
                    .await;
                break;
            }
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => handle_inbound(&state, &id, text.as_bytes()),
                Some(Ok(Message::Binary(data))) => handle_inbound(&state, &id, &data),
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

#[derive(Deserialize)]
struct ResizeMessage {
    #[serde(rename = "type")]
    kind: String,
    cols: u16,
    rows: u16,
}

fn handle_inbound(state: &AppState, id: &str, payload: &[u8]) {
    if let Ok(msg) = serde_json::from_slice::<ResizeMessage>(payload) {
        if msg.kind == "resize" && msg.cols > 0 && msg.rows > 0 {
            if let Err(e) = state.sessions.resize(id, msg.cols, msg.rows) {
                log::debug!("resize for {id} failed: {e}");
            }
            return;
        }
    }
    if let Err(e) = state.sessions.write_input(id, payload) {
        log::debug!("input for {id} dropped: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_messages_parse() {
        let msg: ResizeMessage =
            serde_json::from_str(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert_eq!(msg.kind, "resize");
        assert_eq!(msg.cols, 120);
        assert_eq!(msg.rows, 40);
    }

    #[test]
    fn keystrokes_do_not_parse_as_resize() {
        assert!(serde_json::from_slice::<ResizeMessage>(b"ls -la\r").is_err());
        assert!(serde_json::from_slice::<ResizeMessage>(b"{\"type\":\"other\"}").is_err());
    }
}
