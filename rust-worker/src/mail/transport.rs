//! Outbound mail transport.
//!
//! The worker talks to an HTTP mail provider's messages endpoint. Requests
//! are form-encoded and authenticated with HTTP basic auth, the convention
//! shared by Mailgun-style APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors raised by a mail transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Delivers one message through the mail provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send a plain-text message, returning the provider's message id.
    async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, TransportError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// HTTP mail provider client.
#[derive(Clone)]
pub struct HttpMailTransport {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpMailTransport {
    pub fn new(client: Client, endpoint: Url, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        let form = [("from", from), ("to", to), ("subject", subject), ("text", body)];

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .form(&form);

        if let Some(key) = &self.api_key {
            request = request.basic_auth("api", Some(key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await?;

        debug!(
            status_code = status.as_u16(),
            response_length = text.len(),
            "mail_provider_response"
        );

        if !status.is_success() {
            return Err(TransportError::Rejected { status, body: text });
        }

        parse_send_response(&text)
    }
}

fn parse_send_response(text: &str) -> Result<String, TransportError> {
    let parsed: SendResponse = serde_json::from_str(text)
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

    // Providers wrap ids in angle brackets, e.g. "<2024.abc@mg.example.com>".
    let id = parsed.id.trim().trim_matches(|c| c == '<' || c == '>').to_string();

    if id.is_empty() {
        return Err(TransportError::InvalidResponse("empty message id".to_string()));
    }

    Ok(id)
}
