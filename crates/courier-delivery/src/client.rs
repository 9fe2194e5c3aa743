//! Webhook delivery provider.
//!
//! Sends one message per call to the configured provider endpoint and turns
//! the response into a provider message id or a categorized delivery error.
//! There is no retry here; the message state machine decides what happens
//! after a failed attempt.

use std::{future::Future, pin::Pin, time::Duration};

use courier_core::Message;
use reqwest::{
    header::{HeaderName, HeaderValue},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DispatchError, Result};

/// Maximum number of response body bytes kept in a rejection reason.
pub const MAX_ERROR_BODY_BYTES: usize = 512;

/// Sends messages to the external delivery channel.
pub trait DeliveryProvider: Send + Sync + 'static {
    /// Makes exactly one delivery attempt and returns the provider's id.
    ///
    /// Returns `DeliveryRejected` when the provider answers with a
    /// non-success response or an empty id, and `DeliveryUnreachable` on
    /// transport or decoding failure.
    fn send<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Configuration for the webhook provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Provider endpoint receiving `POST {to, content}`.
    pub url: String,
    /// Optional auth header name; ignored when empty.
    pub auth_header: String,
    /// Value sent with `auth_header`.
    pub auth_value: String,
    /// Accept any 2xx instead of requiring 202 Accepted.
    pub accept_any_2xx: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_header: String::new(),
            auth_value: String::new(),
            accept_any_2xx: false,
            timeout: Duration::from_secs(crate::DEFAULT_WEBHOOK_TIMEOUT_SECONDS),
            user_agent: "Courier-Dispatch/1.0".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId", default)]
    message_id: String,
    #[serde(default)]
    message: String,
}

/// HTTP provider client posting messages to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
    auth: Option<(HeaderName, HeaderValue)>,
}

impl WebhookClient {
    /// Creates a new webhook client.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the URL is empty, the auth
    /// header is malformed, or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(DispatchError::configuration("webhook url must not be empty"));
        }
        reqwest::Url::parse(config.url.trim())
            .map_err(|e| DispatchError::configuration(format!("invalid webhook url: {e}")))?;

        let auth = if config.auth_header.trim().is_empty() {
            None
        } else {
            let name = HeaderName::from_bytes(config.auth_header.trim().as_bytes()).map_err(
                |e| DispatchError::configuration(format!("invalid auth header name: {e}")),
            )?;
            let value = HeaderValue::from_str(&config.auth_value).map_err(|e| {
                DispatchError::configuration(format!("invalid auth header value: {e}"))
            })?;
            Some((name, value))
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, auth })
    }

    fn is_accepted(&self, status: StatusCode) -> bool {
        status == StatusCode::ACCEPTED || (self.config.accept_any_2xx && status.is_success())
    }

    async fn post(&self, message: &Message) -> Result<String> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&SendRequest { to: &message.to_phone, content: &message.content });

        if let Some((name, value)) = &self.auth {
            request = request.header(name.clone(), value.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::unreachable(format!(
                    "request timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            } else if e.is_connect() {
                DispatchError::unreachable(format!("connection failed: {e}"))
            } else {
                DispatchError::unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !self.is_accepted(status) {
            let body = response.bytes().await.unwrap_or_default();
            let body = truncate_body(&body);
            warn!(status = status.as_u16(), "provider rejected message");
            return Err(DispatchError::rejected(format!("HTTP {}: {body}", status.as_u16())));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::unreachable(format!("malformed provider response: {e}")))?;

        if parsed.message_id.is_empty() {
            return Err(DispatchError::rejected(format!(
                "provider returned an empty messageId (message: {:?})",
                parsed.message
            )));
        }

        debug!(provider_message_id = %parsed.message_id, "provider accepted message");
        Ok(parsed.message_id)
    }
}

impl DeliveryProvider for WebhookClient {
    fn send<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let span = info_span!("provider_send", message_id = %message.id);
        Box::pin(self.post(message).instrument(span))
    }
}

/// Lossy UTF-8 view of at most [`MAX_ERROR_BODY_BYTES`] of a response body.
fn truncate_body(body: &[u8]) -> String {
    let end = body.len().min(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer, accept_any_2xx: bool) -> WebhookClient {
        WebhookClient::new(ClientConfig {
            url: format!("{}/send", server.uri()),
            accept_any_2xx,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn message() -> Message {
        Message::queued("+15550001111", "hello", Utc::now())
    }

    #[tokio::test]
    async fn accepted_response_returns_provider_id() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/send"))
            .and(matchers::body_json(serde_json::json!({
                "to": "+15550001111",
                "content": "hello"
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"messageId": "prov-42", "message": "ok"})),
            )
            .mount(&server)
            .await;

        let id = client_for(&server, false).send(&message()).await.unwrap();
        assert_eq!(id, "prov-42");
    }

    #[tokio::test]
    async fn plain_ok_rejected_unless_any_2xx_allowed() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"messageId": "prov-1", "message": "ok"})),
            )
            .mount(&server)
            .await;

        let strict = client_for(&server, false).send(&message()).await;
        assert!(matches!(strict, Err(DispatchError::DeliveryRejected { .. })));

        let relaxed = client_for(&server, true).send(&message()).await.unwrap();
        assert_eq!(relaxed, "prov-1");
    }

    #[tokio::test]
    async fn empty_message_id_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"messageId": "", "message": "queued"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server, false).send(&message()).await;
        assert!(matches!(result, Err(DispatchError::DeliveryRejected { .. })));
    }

    #[tokio::test]
    async fn server_error_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(2_000)))
            .mount(&server)
            .await;

        let error = client_for(&server, false).send(&message()).await.unwrap_err();
        let reason = match error {
            DispatchError::DeliveryRejected { reason } => reason,
            other => panic!("expected rejection, got {other:?}"),
        };
        assert!(reason.starts_with("HTTP 500: "));
        assert_eq!(reason.len(), "HTTP 500: ".len() + MAX_ERROR_BODY_BYTES);
    }

    #[tokio::test]
    async fn malformed_json_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = client_for(&server, false).send(&message()).await;
        assert!(matches!(result, Err(DispatchError::DeliveryUnreachable { .. })));
    }

    #[tokio::test]
    async fn auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header("x-ins-auth-key", "secret"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"messageId": "prov-7", "message": "ok"})),
            )
            .mount(&server)
            .await;

        let client = WebhookClient::new(ClientConfig {
            url: format!("{}/send", server.uri()),
            auth_header: "x-ins-auth-key".to_string(),
            auth_value: "secret".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();

        assert_eq!(client.send(&message()).await.unwrap(), "prov-7");
    }

    #[tokio::test]
    async fn timeout_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = WebhookClient::new(ClientConfig {
            url: format!("{}/send", server.uri()),
            timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        })
        .unwrap();

        let result = client.send(&message()).await;
        assert!(matches!(result, Err(DispatchError::DeliveryUnreachable { .. })));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let client = WebhookClient::new(ClientConfig {
            url: "http://127.0.0.1:9/send".to_string(),
            timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        })
        .unwrap();

        let result = client.send(&message()).await;
        assert!(matches!(result, Err(DispatchError::DeliveryUnreachable { .. })));
    }

    #[test]
    fn empty_url_is_configuration_error() {
        let result = WebhookClient::new(ClientConfig::default());
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));

        let result = WebhookClient::new(ClientConfig {
            url: "not a url".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }

    #[test]
    fn invalid_auth_header_is_configuration_error() {
        let result = WebhookClient::new(ClientConfig {
            url: "http://localhost/send".to_string(),
            auth_header: "bad header".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }
}
