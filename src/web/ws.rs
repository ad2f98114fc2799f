use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::{Filter, Rejection};

use super::with_state;
use crate::capture::ListFilter;
use crate::state::AppState;

pub fn route(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = Rejection> + Clone {
    warp::path!("api" / "ws")
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: warp::ws::Ws, state| ws.on_upgrade(move |socket| client_connected(socket, state)))
}

async fn client_connected(ws: warp::ws::WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    // Forward messages from the channel to the socket
    tokio::spawn(async move {
        while let Some(msg) = rx.next().await {
            if let Err(e) = ws_tx.send(msg).await {
                tracing::debug!("websocket send error: {}", e);
                break;
            }
        }
    });

    // Rehydration batch: newest records first, capped
    let mut recent = state.store.list(&ListFilter::default());
    recent.truncate(state.config.events.rehydrate_limit);
    let msg = warp::ws::Message::text(
        serde_json::json!({
            "type": "rehydrate",
            "data": recent
        })
        .to_string(),
    );
    if tx.send(msg).is_err() {
        return;
    }

    let mut events_rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Ok(record) => {
                        let msg = warp::ws::Message::text(
                            serde_json::json!({
                                "type": "new",
                                "data": &*record
                            })
                            .to_string(),
                        );
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // At-most-once delivery; a slow client just misses events.
                        tracing::debug!("websocket subscriber lagged, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("websocket connection closing due to shutdown");
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) if msg.is_close() => break,
                    // Inbound client messages are ignored; the feed is one-way.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("websocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::debug!("websocket client disconnected");
}
