//! Wiremock-backed stand-in for the webhook provider.

use std::time::Duration;

use courier_delivery::client::ClientConfig;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Path the provider double listens on.
pub const SEND_PATH: &str = "/send";

/// HTTP provider double.
pub struct ProviderServer {
    server: MockServer,
}

impl ProviderServer {
    /// Starts a provider on a random port with no responses mounted.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Full URL of the send endpoint.
    pub fn url(&self) -> String {
        format!("{}{SEND_PATH}", self.server.uri())
    }

    /// Client configuration pointing at this provider.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url(),
            timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    /// Accepts every message with `202` and the given provider id.
    pub async fn accept_all(&self, provider_message_id: &str) {
        self.mount(accepted(provider_message_id), None).await;
    }

    /// Accepts the next `times` messages with the given provider id.
    pub async fn accept_times(&self, provider_message_id: &str, times: u64) {
        self.mount(accepted(provider_message_id), Some(times)).await;
    }

    /// Rejects the next `times` messages with `status` and `body`.
    pub async fn reject_times(&self, status: u16, body: &str, times: u64) {
        self.mount(ResponseTemplate::new(status).set_body_string(body), Some(times)).await;
    }

    /// Rejects every message with `status` and `body`.
    pub async fn reject_all(&self, status: u16, body: &str) {
        self.mount(ResponseTemplate::new(status).set_body_string(body), None).await;
    }

    /// Number of requests the provider has received.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }

    /// Decoded JSON bodies of every request received.
    pub async fn request_bodies(&self) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }

    async fn mount(&self, response: ResponseTemplate, times: Option<u64>) {
        let mut mock = Mock::given(method("POST")).and(path(SEND_PATH)).respond_with(response);
        if let Some(times) = times {
            mock = mock.up_to_n_times(times);
        }
        mock.mount(&self.server).await;
    }
}

fn accepted(provider_message_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(202)
        .set_body_json(json!({"messageId": provider_message_id, "message": "Accepted"}))
}
