use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock Signal gateway websocket server for integration tests.
///
/// Binds to port 0 (random), accepts a single connection, and exposes two
/// channels: `push` sends a raw JSON frame to the connected client; `from_client`
/// yields whatever text frames the client sends. Each test spins up its own
/// isolated instance.
pub struct MockGatewayServer {
    addr: SocketAddr,
    push_tx: mpsc::Sender<String>,
    from_client_rx: mpsc::Receiver<String>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockGatewayServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (push_tx, push_rx) = mpsc::channel::<String>(64);
        let (from_client_tx, from_client_rx) = mpsc::channel::<String>(64);

        let task = tokio::spawn(async move {
            Self::accept_one(listener, push_rx, from_client_tx).await;
        });

        Ok(Self {
            addr,
            push_tx,
            from_client_rx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/v1/receive", self.addr)
    }

    /// Send a raw frame to the connected client, as if the gateway emitted it.
    pub async fn push(&self, frame: impl Into<String>) {
        let _ = self.push_tx.send(frame.into()).await;
    }

    /// Receive the next text frame the client sent, if any arrives before
    /// the caller stops polling.
    pub async fn recv_from_client(&mut self) -> Option<String> {
        self.from_client_rx.recv().await
    }

    async fn accept_one(
        listener: TcpListener,
        mut push_rx: mpsc::Receiver<String>,
        from_client_tx: mpsc::Sender<String>,
    ) {
        let Ok((stream, _peer)) = listener.accept().await else {
            return;
        };
        let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;
                frame = push_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = from_client_tx.send(text.to_string()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn pushes_frame_to_connected_client() {
        let server = MockGatewayServer::start().await.unwrap();
        let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();
        server.push(r#"{"envelope":{"source":"+1","timestamp":1}}"#).await;
        let msg = ws.next().await.unwrap().unwrap();
        assert!(msg.into_text().unwrap().contains("envelope"));
        let _ = ws.close(None).await;
    }

    #[tokio::test]
    async fn collects_frames_sent_by_client() {
        let mut server = MockGatewayServer::start().await.unwrap();
        let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();
        ws.send(Message::Text("hello-gateway".into())).await.unwrap();
        let received = server.recv_from_client().await.unwrap();
        assert_eq!(received, "hello-gateway");
    }
}
