//! WebSocket server implementation.
//!
//! Accepts WebSocket connections at `/ws` and serves the service metrics at
//! `/metrics`. Every connection registers one subscriber with the service;
//! a writer task drains that subscriber's channel into the socket while the
//! read loop applies subscribe and unsubscribe requests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zipcore_node::{Subscriber, ZipService};

use crate::error::WsError;
use crate::protocol::{apply, ClientMessage, ServerMessage};

/// The relay server, bound to a port and serving one service.
pub struct WebSocketServer {
    pub port: u16,
    service: Arc<ZipService>,
}

impl WebSocketServer {
    pub fn new(port: u16, service: Arc<ZipService>) -> Self {
        Self { port, service }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.service.clone())
    }

    /// Listen on all interfaces until the service shuts down.
    pub async fn start(&self) -> Result<(), WsError> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| WsError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the service shuts down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), WsError> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?local, "WebSocket relay listening");
        let shutdown = self.service.shutdown_controller().clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(service): State<Arc<ZipService>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn metrics_handler(State(service): State<Arc<ZipService>>) -> impl IntoResponse {
    match service.metrics().encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn reply(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!(error = %e, "failed to encode reply");
            None
        }
    }
}

/// Handle a single WebSocket connection until the client goes away.
async fn handle_socket(socket: WebSocket, service: Arc<ZipService>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (subscriber, mut published) = Subscriber::channel();
    let (replies, mut outgoing) = mpsc::unbounded_channel::<Message>();

    debug!(subscriber = subscriber.id(), "WebSocket client connected");

    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(event) = published.recv() => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!(error = %e, "failed to encode event");
                        continue;
                    }
                },
                Some(message) = outgoing.recv() => message,
                else => break,
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket receive error");
                break;
            }
        };

        let response = match message {
            Message::Text(text) => {
                let answer = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(request) => apply(&service, &subscriber, request),
                    Err(e) => ServerMessage::Error {
                        message: format!("Invalid message: {e}"),
                    },
                };
                reply(&answer)
            }
            Message::Ping(data) => Some(Message::Pong(data)),
            Message::Close(_) => break,
            _ => None,
        };
        if let Some(response) = response {
            if replies.send(response).is_err() {
                break;
            }
        }
    }

    service.remove_subscriber(&subscriber);
    writer.abort();
    debug!(subscriber = subscriber.id(), "WebSocket client disconnected");
}
