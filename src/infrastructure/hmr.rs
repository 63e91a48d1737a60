use crate::core::models::PushEvent;
use crate::utils::{KilnError, Logger, Result};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HmrClient {
    pub id: String,
    pub addr: SocketAddr,
    pub connected_at: SystemTime,
}

/// WebSocket push channel. Every connected browser receives each
/// `PushEvent` published on the orchestrator's broadcast channel.
#[derive(Clone)]
pub struct HmrServer {
    clients: Arc<DashMap<String, HmrClient>>,
    events: broadcast::Sender<PushEvent>,
}

impl HmrServer {
    pub fn new(events: broadcast::Sender<PushEvent>) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Bind before the first build so a busy port fails the session early
    pub async fn bind(port: u16) -> Result<TcpListener> {
        let addr = format!("127.0.0.1:{}", port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| KilnError::Server(format!("HMR server bind failed on {}: {}", addr, e)))
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("🔥 HMR server listening on ws://{}", addr);
        }

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| KilnError::Server(format!("HMR accept failed: {}", e)))?;

            // Subscribe before the handshake so nothing published meanwhile is lost
            let receiver = self.events.subscribe();
            let clients = self.clients.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_client(stream, addr, clients, receiver).await {
                    Logger::warn(&format!("HMR client error {}: {}", addr, e));
                }
            });
        }
    }

    async fn handle_client(
        stream: TcpStream,
        addr: SocketAddr,
        clients: Arc<DashMap<String, HmrClient>>,
        mut receiver: broadcast::Receiver<PushEvent>,
    ) -> Result<()> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| KilnError::Server(format!("WebSocket handshake failed: {}", e)))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let client_id = Uuid::new_v4().to_string();

        clients.insert(
            client_id.clone(),
            HmrClient {
                id: client_id.clone(),
                addr,
                connected_at: SystemTime::now(),
            },
        );
        tracing::debug!("🔌 HMR client connected: {} ({})", client_id, addr);

        let welcome = serde_json::to_string(&PushEvent::connected())?;
        let mut open = ws_sender.send(Message::Text(welcome)).await.is_ok();

        while open {
            tokio::select! {
                event = receiver.recv() => {
                    let event = match event {
                        Ok(event) => Some(event),
                        // Missed updates: a reload brings the page up to date
                        Err(broadcast::error::RecvError::Lagged(_)) => Some(PushEvent::reload()),
                        Err(broadcast::error::RecvError::Closed) => None,
                    };
                    open = match event {
                        Some(event) => {
                            let payload = serde_json::to_string(&event)?;
                            ws_sender.send(Message::Text(payload)).await.is_ok()
                        }
                        None => false,
                    };
                }
                incoming = ws_receiver.next() => {
                    open = matches!(incoming, Some(Ok(message)) if !message.is_close());
                }
            }
        }

        clients.remove(&client_id);
        tracing::debug!("🔌 HMR client disconnected: {}", client_id);

        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
