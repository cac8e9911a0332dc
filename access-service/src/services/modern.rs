//! Modern platform client: one authorized-parties call per subject.

use crate::config::ModernConfig;
use crate::models::{Party, SubjectId};
use crate::services::metrics::record_upstream_call;
use crate::services::{SourceError, read_success_body};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use service_core::observability::TracedClientExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const PERSON_IDENTIFIER_URN: &str = "urn:altinn:person:identifier-no";

#[async_trait]
pub trait ModernAccessSource: Send + Sync {
    /// The full party hierarchy, or a wholesale failure.
    async fn fetch(&self, subject: &SubjectId) -> Result<Vec<Party>, SourceError>;
}

#[derive(Debug, Serialize)]
struct AuthorizedPartiesRequest<'a> {
    #[serde(rename = "type")]
    identifier_type: &'a str,
    value: &'a str,
}

pub struct HttpModernSource {
    client: Client,
    config: ModernConfig,
}

impl HttpModernSource {
    pub fn new(config: ModernConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    async fn fetch_parties(&self, subject: &SubjectId) -> Result<Vec<Party>, SourceError> {
        let url = format!(
            "{}/accessmanagement/api/v1/resourceowner/authorizedparties",
            self.config.base_url
        );

        let response = self
            .client
            .traced_post(&url)
            .header(
                "Ocp-Apim-Subscription-Key",
                self.config.subscription_key.expose_secret(),
            )
            .query(&[("includeAltinn2", "true")])
            .json(&AuthorizedPartiesRequest {
                identifier_type: PERSON_IDENTIFIER_URN,
                value: subject.as_str(),
            })
            .send()
            .await?;

        let body = read_success_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ModernAccessSource for HttpModernSource {
    async fn fetch(&self, subject: &SubjectId) -> Result<Vec<Party>, SourceError> {
        match self.fetch_parties(subject).await {
            Ok(parties) => {
                record_upstream_call("modern", "ok");
                Ok(parties)
            }
            Err(e) => {
                record_upstream_call("modern", e.kind());
                tracing::error!(error = %e, "Authorized parties lookup failed");
                Err(e)
            }
        }
    }
}

/// Canned modern source for tests and local runs.
pub struct MockModernSource {
    parties: Option<Vec<Party>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockModernSource {
    pub fn new(parties: Vec<Party>) -> Self {
        Self {
            parties: Some(parties),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// A source whose every call fails.
    pub fn failing() -> Self {
        Self {
            parties: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModernAccessSource for MockModernSource {
    async fn fetch(&self, _subject: &SubjectId) -> Result<Vec<Party>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.parties.clone().ok_or_else(|| SourceError::Status {
            status: 503,
            body: "mock modern source unavailable".to_string(),
        })
    }
}
