//! Thin REST client over the upstream gateway's HTTP surface. Every call
//! goes through the rate limiter and circuit breaker for its resource
//! before touching the network.

use serde::Serialize;
use signal_protocol::{ErrorKind, Resource};
use signal_resilience::{GuardError, ResilienceRegistry};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("rate limiter/circuit breaker refused the call: {0}")]
    Guard(#[from] GuardError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl ApiError {
    pub fn classify(&self) -> ErrorKind {
        match self {
            ApiError::Guard(_) => ErrorKind::TransientBreakerOpen,
            ApiError::Network(_) => ErrorKind::TransientNetwork,
            ApiError::Status { status, .. } => ErrorKind::from_status(*status),
        }
    }
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    recipient: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_author: Option<&'a str>,
}

#[derive(Serialize)]
struct ReactionBody<'a> {
    recipient: &'a str,
    emoji: &'a str,
    target_author: &'a str,
    target_timestamp: i64,
    remove: bool,
}

#[derive(Serialize)]
struct TypingBody<'a> {
    recipient: &'a str,
    stop: bool,
}

/// Client for the upstream gateway's REST surface, gated by [`ResilienceRegistry`].
pub struct SignalApiClient {
    http: reqwest::Client,
    api_url: String,
    resilience: Arc<ResilienceRegistry>,
}

impl SignalApiClient {
    pub fn new(api_url: String, resilience: Arc<ResilienceRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            resilience,
        }
    }

    async fn call(&self, resource: Resource, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let permit = self.resilience.guard(resource).await?;
        let result = request.send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                permit.record_success();
                Ok(())
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if ErrorKind::from_status(status).is_retryable() {
                    permit.record_failure();
                } else {
                    permit.record_success();
                }
                Err(ApiError::Status { status, body })
            }
            Err(err) => {
                permit.record_failure();
                Err(ApiError::Network(err))
            }
        }
    }

    pub async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        quote_id: Option<i64>,
        quote_author: Option<&str>,
    ) -> Result<(), ApiError> {
        let url = format!("{}/v2/send", self.api_url);
        let body = SendMessageBody {
            recipient,
            message: text,
            quote_id,
            quote_author,
        };
        self.call(Resource::Messages, self.http.post(url).json(&body))
            .await
    }

    pub async fn send_reaction(
        &self,
        recipient: &str,
        emoji: &str,
        target_author: &str,
        target_timestamp: i64,
        remove: bool,
    ) -> Result<(), ApiError> {
        let url = format!("{}/v1/reactions", self.api_url);
        let body = ReactionBody {
            recipient,
            emoji,
            target_author,
            target_timestamp,
            remove,
        };
        self.call(Resource::Reactions, self.http.post(url).json(&body))
            .await
    }

    pub async fn set_typing(&self, recipient: &str, stop: bool) -> Result<(), ApiError> {
        let url = format!("{}/v1/typing-indicator", self.api_url);
        let body = TypingBody { recipient, stop };
        self.call(Resource::General, self.http.put(url).json(&body))
            .await
    }

    pub async fn download_attachment(&self, attachment_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/v1/attachments/{attachment_id}", self.api_url);
        let permit = self.resilience.guard(Resource::Attachments).await?;
        let response = self.http.get(url).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                permit.record_success();
                Ok(resp.bytes().await?.to_vec())
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                if ErrorKind::from_status(status).is_retryable() {
                    permit.record_failure();
                } else {
                    permit.record_success();
                }
                Err(ApiError::Status {
                    status,
                    body: resp.text().await.unwrap_or_default(),
                })
            }
            Err(err) => {
                permit.record_failure();
                Err(ApiError::Network(err))
            }
        }
    }
}
