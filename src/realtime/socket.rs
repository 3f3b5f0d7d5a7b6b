//! WebSocket endpoint bridging axum sockets to the hub

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::RealtimeHub;
use crate::web::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (sink, mut stream) = socket.split();
    let (id, inbox) = hub.connect().await;

    // Writer drains this client's queue independently of the read loop
    let writer = tokio::spawn(async move {
        let frames = ReceiverStream::new(inbox).map(|frame| Ok::<_, axum::Error>(Message::Text(frame.to_string())));
        if let Err(e) = frames.forward(sink).await {
            debug!(client = %id, "WebSocket write ended: {}", e);
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => hub.handle_message(id, &text).await,
            Ok(Message::Close(_)) => break,
            // pings are answered by axum; binary frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                debug!(client = %id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    hub.disconnect(id).await;
    writer.abort();
}
