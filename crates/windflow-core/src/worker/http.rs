//! JSON-over-HTTP worker client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use super::{TransportError, Worker};
use crate::{Result, WindflowError};

/// Worker reached with a JSON POST to a fixed URL
#[derive(Debug, Clone)]
pub struct HttpWorker {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpWorker {
    /// `request_timeout` is a per-attempt backstop; the invoker enforces the
    /// overall bound.
    pub fn new(name: impl Into<String>, url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("windflow/{}", crate::VERSION))
            .build()
            .map_err(|e| WindflowError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::TimedOut(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, payload: &Value) -> std::result::Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::PermissionDenied {
                status: status.as_u16(),
                body,
            }),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(format!("{} ({})", self.url, body))),
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Err(TransportError::Unavailable {
                status: status.as_u16(),
                body,
            }),
            // Workers report their own failures as a 500 with the usual envelope
            StatusCode::INTERNAL_SERVER_ERROR => match serde_json::from_str::<Value>(&body) {
                Ok(envelope) if envelope.get("success").is_some() => Ok(envelope),
                _ => Err(TransportError::Http {
                    status: status.as_u16(),
                    body,
                }),
            },
            _ => Err(TransportError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }

    /// Any HTTP response means the endpoint is reachable
    async fn ping(&self) -> std::result::Result<(), TransportError> {
        self.client
            .get(&self.url)
            .send()
            .await
            .map(|_| ())
            .map_err(send_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_worker_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments
        let worker = HttpWorker::new("terrain-analysis", "http://127.0.0.1:9/invoke", Duration::from_millis(500)).unwrap();
        let err = worker.invoke(&serde_json::json!({})).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
        assert!(worker.ping().await.is_err());
        assert_eq!(worker.name(), "terrain-analysis");
    }
}
