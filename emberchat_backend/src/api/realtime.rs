use super::AppState;
use crate::events::{ClientEvent, ServerEvent};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// One task per connection: the write half drains the hub's event channel,
/// the read half feeds client events into the hub. A malformed frame fails
/// only that frame's operation.
async fn handle_socket(state: AppState, socket: WebSocket) {
    let client_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    state.hub.on_connect(&client_id, event_tx).await;

    let writer_client_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(
                        client_id = %writer_client_id,
                        error = ?err,
                        "failed to encode server event"
                    );
                    continue;
                }
            };
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(raw)) => match serde_json::from_str::<ClientEvent>(&raw) {
                Ok(ClientEvent::SendMessage(input)) => {
                    if let Err(err) = state.hub.on_send(&client_id, input).await {
                        tracing::warn!(client_id = %client_id, error = ?err, "rejected message");
                    }
                }
                Ok(ClientEvent::BlobUploadComplete { key, url }) => {
                    state.hub.on_upload_complete(&key, &url).await;
                }
                Err(err) => {
                    tracing::warn!(client_id = %client_id, error = ?err, "malformed client event");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary/ping/pong frames carry no client events
            Err(err) => {
                tracing::debug!(client_id = %client_id, error = ?err, "websocket read error");
                break;
            }
        }
    }

    state.hub.on_disconnect(&client_id).await;
    writer.abort();
}
