use super::{AgentIdentity, Payload, ResultSink};
use crate::error::SinkError;
use crate::model::ScanResult;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

pub const MACHINE_ID_HEADER: &str = "x-ultrapki-machine-id";

pub const REGISTRATION_HINT: &str = "\
No token provided.
You can register your system in seconds with the following command:

  curl -sSf https://cd.ultrapki.com/sh | sh

This will generate a token for your system and show you how to add it to your config.
";

/// Posts every batch as one JSON payload. Only a 403 without a token is
/// reported as fatal; everything else just loses the batch.
pub struct WebhookSink {
    client: Client,
    url: String,
    token: String,
    identity: AgentIdentity,
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        identity: AgentIdentity,
        request_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("certscan/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
            identity,
        })
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    #[instrument(skip_all, fields(url = %self.url, results = results.len()))]
    async fn send(&self, results: Vec<ScanResult>) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&Payload::new(&self.identity, &results))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if !self.token.is_empty() {
            request = request
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .header(MACHINE_ID_HEADER, &self.identity.machine_id);
        }

        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "webhook accepted batch");
            return Ok(());
        }

        if status == StatusCode::FORBIDDEN && self.token.is_empty() {
            return Err(SinkError::Unauthorized {
                url: self.url.clone(),
            });
        }
        Err(SinkError::Status {
            status: status.as_u16(),
        })
    }
}
