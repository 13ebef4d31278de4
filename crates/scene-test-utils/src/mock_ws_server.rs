// mock_ws_server: a minimal WS double speaking the gateway's wire protocol,
// for exercising MockWsClient without standing up the full broadcast-gateway
// binary (bus, store, auth, etc).
//
// Behavior: on connect, immediately sends `Connected`. Replies to `Ping`
// with `Pong`, and to `GenRequest` with a synthetic successful `GenResult`.
// `Subscribe`/`Unsubscribe` are accepted and otherwise ignored -- this
// double does not implement real frame delivery.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use scene_protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid;

pub struct MockWsServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            Self::accept_loop(listener).await;
        });
        Ok(Self { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept_loop(listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        let connected = ServerMessage::Connected {
            tenant_id: "test-tenant".to_owned(),
            server_ts: 0,
        };
        write
            .send(Message::Text(serde_json::to_string(&connected)?.into()))
            .await?;

        while let Some(msg_result) = read.next().await {
            let msg = msg_result?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => continue,
            };

            let reply = match client_msg {
                ClientMessage::Ping { ts } => Some(ServerMessage::Pong { ts }),
                ClientMessage::GenRequest { job_id, .. } => Some(ServerMessage::GenResult {
                    job_id,
                    success: true,
                    scene_id: Some(Uuid::new_v4()),
                    error: None,
                }),
                ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => None,
            };

            if let Some(reply) = reply {
                write
                    .send(Message::Text(serde_json::to_string(&reply)?.into()))
                    .await?;
            }
        }

        Ok(())
    }
}
