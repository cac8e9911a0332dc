//! Legacy platform client.
//!
//! The legacy platform answers "which organizations may this person act for
//! in service X", one service definition at a time, paginated.

use crate::config::LegacyConfig;
use crate::models::{LegacyGrant, SubjectId};
use crate::services::metrics::record_upstream_call;
use crate::services::{SourceError, read_success_body};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Grants per organization number. `is_error` means at least one service
/// query failed and `grants` may be incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyAccessResult {
    pub is_error: bool,
    pub grants: HashMap<String, Vec<LegacyGrant>>,
}

#[async_trait]
pub trait LegacyAccessSource: Send + Sync {
    /// Never fails outright; failures surface as `is_error`.
    async fn fetch(&self, subject: &SubjectId) -> LegacyAccessResult;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reportee {
    #[serde(rename = "Type", default)]
    reportee_type: Option<String>,
    #[serde(default)]
    organization_number: Option<String>,
}

impl Reportee {
    /// Organization number of non-person reportees.
    fn into_org_number(self) -> Option<String> {
        if self
            .reportee_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("person"))
        {
            return None;
        }
        self.organization_number.filter(|org| !org.is_empty())
    }
}

pub struct HttpLegacySource {
    client: Client,
    config: LegacyConfig,
    services: Vec<LegacyGrant>,
}

impl HttpLegacySource {
    pub fn new(config: LegacyConfig, services: Vec<LegacyGrant>) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            config,
            services,
        })
    }

    async fn fetch_service(
        &self,
        subject: &SubjectId,
        service: &LegacyGrant,
    ) -> Result<Vec<String>, SourceError> {
        let page_size = self.config.page_size.max(1);
        let mut org_numbers = Vec::new();
        let mut skip = 0usize;

        loop {
            let page = self.fetch_page(subject, service, skip, page_size).await?;
            let page_len = page.len();
            org_numbers.extend(page.into_iter().filter_map(Reportee::into_org_number));

            if page_len < page_size {
                return Ok(org_numbers);
            }
            skip += page_size;
        }
    }

    async fn fetch_page(
        &self,
        subject: &SubjectId,
        service: &LegacyGrant,
        skip: usize,
        top: usize,
    ) -> Result<Vec<Reportee>, SourceError> {
        let url = format!("{}/api/serviceowner/reportees", self.config.base_url);
        let top = top.to_string();
        let skip = skip.to_string();

        let response = self
            .client
            .traced_get(&url)
            .header("ApiKey", self.config.api_key.expose_secret())
            .header("accept", "application/json")
            .query(&[
                ("subject", subject.as_str()),
                ("serviceCode", service.service_code.as_str()),
                ("serviceEdition", service.service_edition.as_str()),
                ("$filter", "Type ne 'Person' and Status eq 'Active'"),
                ("showConsolidated", "true"),
                ("$top", top.as_str()),
                ("$skip", skip.as_str()),
            ])
            .send()
            .await?;

        let body = read_success_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl LegacyAccessSource for HttpLegacySource {
    async fn fetch(&self, subject: &SubjectId) -> LegacyAccessResult {
        let outcomes = join_all(
            self.services
                .iter()
                .map(|service| async move { (service, self.fetch_service(subject, service).await) }),
        )
        .await;

        let mut result = LegacyAccessResult::default();
        for (service, outcome) in outcomes {
            match outcome {
                Ok(org_numbers) => {
                    record_upstream_call("legacy", "ok");
                    for org_number in org_numbers {
                        result
                            .grants
                            .entry(org_number)
                            .or_default()
                            .push(service.clone());
                    }
                }
                Err(e) => {
                    record_upstream_call("legacy", e.kind());
                    if e.is_timeout() {
                        tracing::warn!(
                            service_code = %service.service_code,
                            service_edition = %service.service_edition,
                            error = %e,
                            "Legacy service query timed out"
                        );
                    } else {
                        tracing::error!(
                            service_code = %service.service_code,
                            service_edition = %service.service_edition,
                            error = %e,
                            "Legacy service query failed"
                        );
                    }
                    result.is_error = true;
                }
            }
        }

        result
    }
}

/// Canned legacy source for tests and local runs.
pub struct MockLegacySource {
    result: LegacyAccessResult,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockLegacySource {
    pub fn new(result: LegacyAccessResult) -> Self {
        Self {
            result,
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
impl LegacyAccessSource for MockLegacySource {
    async fn fetch(&self, _subject: &SubjectId) -> LegacyAccessResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}
