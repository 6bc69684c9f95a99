//! Websocket receiver: maintains a persistent connection to the upstream
//! gateway and hands each inbound frame to the queue as a [`RawEnvelope`].
//! Never interprets frame contents.

use crate::queue::{BoundedQueue, EnqueueOutcome};
use futures_util::StreamExt;
use signal_protocol::RawEnvelope;
use signal_resilience::jittered;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const BACKOFF_JITTER: f64 = 0.25;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}

/// Validate the gateway URL eagerly; everything else is retried forever.
pub fn validate_service_url(url: &str) -> Result<(), ReceiverError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    url.into_client_request()
        .map(|_| ())
        .map_err(|e| ReceiverError::InvalidUrl(format!("{url}: {e}")))
}

/// Run the receive loop until `shutdown` fires. Reconnects on any transport
/// error with bounded exponential backoff; never gives up.
pub async fn run(
    service_url: String,
    queue: Arc<BoundedQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match tokio_tungstenite::connect_async(&service_url).await {
            Ok((ws, _response)) => {
                attempt = 0;
                info!(url = %service_url, "connected to gateway");
                if run_connection(ws, &queue, &mut shutdown).await {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, attempt, "gateway connection failed");
            }
        }
        if *shutdown.borrow() {
            break;
        }
        let backoff = (INITIAL_BACKOFF.as_secs_f64() * BACKOFF_MULTIPLIER.powi(attempt as i32))
            .min(MAX_BACKOFF.as_secs_f64());
        let wait = jittered(Duration::from_secs_f64(backoff), BACKOFF_JITTER);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            biased;
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
            _ = tokio::time::sleep(wait) => {}
        }
    }
    info!("receiver stopped");
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Drive one connection until it closes, errors, or shutdown fires.
/// Returns `true` when shutdown was the cause (caller should stop retrying).
async fn run_connection(
    mut ws: WsStream,
    queue: &Arc<BoundedQueue>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return true;
                }
            }
            frame = ws.next() => {
                match frame {
                    None => return false,
                    Some(Err(err)) => {
                        error!(error = %err, "gateway read error");
                        return false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let envelope = RawEnvelope::new(text.to_string());
                        match queue.enqueue(envelope).await {
                            EnqueueOutcome::Accepted => {}
                            EnqueueOutcome::DroppedOldest => {
                                debug!("queue full, dropped oldest item");
                            }
                            EnqueueOutcome::Rejected => {
                                warn!("queue full, rejected inbound frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => return false,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_syntactically_invalid_url() {
        assert!(validate_service_url("not a url").is_err());
    }

    #[test]
    fn accepts_well_formed_ws_url() {
        assert!(validate_service_url("ws://localhost:8080/v1/receive").is_ok());
    }
}
