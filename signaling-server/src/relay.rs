use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use webrtc_pubsub_protocol::bus::BusFrame;

pub type ConnectionId = usize;
pub type Connections = Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>;
pub type Subscriptions = Arc<RwLock<HashMap<String, HashSet<ConnectionId>>>>;

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn user_connected(ws: WebSocket, connections: Connections, subscriptions: Subscriptions) {
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!("new bus client connected: {}", connection_id);

    let (mut user_ws_tx, mut user_ws_rx) = ws.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            if let Err(err) = user_ws_tx.send(message).await {
                error!("websocket send error: {}", err);
                break;
            }
        }
    });

    connections.write().await.insert(connection_id, tx);

    while let Some(result) = user_ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket error (id={}): {}", connection_id, err);
                break;
            }
        };
        match message {
            Message::Text(text) => {
                frame_received(connection_id, &text, &connections, &subscriptions).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!("bus client disconnected: {}", connection_id);
    user_disconnected(connection_id, &connections, &subscriptions).await;
}

async fn frame_received(
    connection_id: ConnectionId,
    text: &str,
    connections: &Connections,
    subscriptions: &Subscriptions,
) {
    let frame = match serde_json::from_str::<BusFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("invalid frame from client {}: {}", connection_id, err);
            return;
        }
    };
    match frame {
        BusFrame::Subscribe { topic } => {
            debug!("client {} subscribed to {}", connection_id, topic);
            subscriptions
                .write()
                .await
                .entry(topic)
                .or_default()
                .insert(connection_id);
        }
        BusFrame::Unsubscribe { topic } => {
            debug!("client {} unsubscribed from {}", connection_id, topic);
            let mut subscriptions = subscriptions.write().await;
            if let Some(subscribers) = subscriptions.get_mut(&topic) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    subscriptions.remove(&topic);
                }
            }
        }
        BusFrame::Publish { topic, payload } => {
            let delivered = publish(topic, payload, connections, subscriptions).await;
            debug!("client {} published to {} subscribers", connection_id, delivered);
        }
        BusFrame::Deliver { topic, .. } => {
            warn!("client {} sent a deliver frame for {}, ignoring", connection_id, topic);
        }
    }
}

/// Send `payload` to every current subscriber of `topic`. Returns how many were reached.
pub async fn publish(
    topic: String,
    payload: String,
    connections: &Connections,
    subscriptions: &Subscriptions,
) -> usize {
    let subscribers: Vec<ConnectionId> = subscriptions
        .read()
        .await
        .get(&topic)
        .map(|subscribers| subscribers.iter().copied().collect())
        .unwrap_or_default();
    if subscribers.is_empty() {
        debug!("nobody listens on {}", topic);
        return 0;
    }

    let text = match serde_json::to_string(&BusFrame::Deliver { topic, payload }) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to serialize deliver frame: {}", err);
            return 0;
        }
    };
    let connections = connections.read().await;
    subscribers
        .iter()
        .filter_map(|subscriber| connections.get(subscriber))
        .filter(|tx| tx.send(Message::Text(text.clone())).is_ok())
        .count()
}

async fn user_disconnected(
    connection_id: ConnectionId,
    connections: &Connections,
    subscriptions: &Subscriptions,
) {
    subscriptions.write().await.retain(|_, subscribers| {
        subscribers.remove(&connection_id);
        !subscribers.is_empty()
    });
    connections.write().await.remove(&connection_id);
}
