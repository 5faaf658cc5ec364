use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::domain::tick::Tick;

/// Upgrade to a WebSocket that relays every received tick as JSON.
pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let ticks = BroadcastStream::new(state.broadcast.subscribe());
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| relay_ticks(socket, ticks, shutdown))
}

async fn relay_ticks(
    socket: WebSocket,
    mut ticks: BroadcastStream<Tick>,
    shutdown: CancellationToken,
) {
    tracing::info!("WebSocket client connected");
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            received = ticks.next() => match received {
                Some(Ok(tick)) => {
                    let text = match serde_json::to_string(&tick) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(symbol = %tick.symbol, error = %e, "Failed to encode tick");
                            continue;
                        }
                    };
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "WebSocket client lagging, ticks skipped");
                }
                None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("WebSocket client disconnected");
}
