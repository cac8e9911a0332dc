//! Resource registry: which roles and access packages grant which modern
//! resources, refreshed in the background.
//!
//! Each tracked resource has one policy-subject list. Lists are replaced
//! whole, so a reader sees either the previous list or the new one. A failed
//! load keeps the previous list.

use crate::catalog::AccessCatalog;
use crate::config::RegistryConfig;
use crate::models::LegacyGrant;
use crate::services::cache::KeyValueCache;
use crate::services::metrics::{record_registry_refresh, record_upstream_call};
use crate::services::{SourceError, read_success_body};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const POLICY_SUBJECTS_TTL: Duration = Duration::from_secs(10 * 60);

const POLICY_SUBJECTS_KEY_PREFIX: &str = "policy-subjects";

#[async_trait]
pub trait PolicySubjectSource: Send + Sync {
    /// URNs of the roles and access packages entitled to `resource_id`.
    async fn fetch_policy_subjects(&self, resource_id: &str) -> Result<Vec<String>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct PolicySubjectsResponse {
    #[serde(default)]
    data: Vec<PolicySubject>,
}

#[derive(Debug, Deserialize)]
struct PolicySubject {
    urn: String,
}

pub struct HttpPolicySubjectSource {
    client: Client,
    base_url: String,
}

impl HttpPolicySubjectSource {
    pub fn new(config: &RegistryConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl PolicySubjectSource for HttpPolicySubjectSource {
    async fn fetch_policy_subjects(&self, resource_id: &str) -> Result<Vec<String>, SourceError> {
        let url = format!(
            "{}/resourceregistry/api/v1/resource/{}/policy/subjects",
            self.base_url, resource_id
        );

        let response = self.client.traced_get(&url).send().await?;
        let body = read_success_body(response).await?;
        let parsed: PolicySubjectsResponse = serde_json::from_str(&body)?;

        Ok(parsed.data.into_iter().map(|subject| subject.urn).collect())
    }
}

/// Fixed policy-subject table, for tests and offline runs.
///
/// Resources missing from the table fail to load.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySubjects {
    subjects: HashMap<String, Vec<String>>,
}

impl StaticPolicySubjects {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: Into<String>,
    {
        Self {
            subjects: subjects
                .into_iter()
                .map(|(resource_id, urns)| {
                    (
                        resource_id.into(),
                        urns.into_iter().map(Into::into).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl PolicySubjectSource for StaticPolicySubjects {
    async fn fetch_policy_subjects(&self, resource_id: &str) -> Result<Vec<String>, SourceError> {
        self.subjects
            .get(resource_id)
            .cloned()
            .ok_or_else(|| SourceError::Status {
                status: 404,
                body: format!("no policy for {}", resource_id),
            })
    }
}

/// Delay between refresh passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub ready: Duration,
    pub not_ready: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(10 * 60),
            not_ready: Duration::from_secs(5),
        }
    }
}

pub struct ResourceRegistry {
    catalog: Arc<AccessCatalog>,
    upstream: Arc<dyn PolicySubjectSource>,
    cache: Arc<dyn KeyValueCache>,
    policy_subjects: DashMap<String, Arc<Vec<String>>>,
    ready: AtomicBool,
    intervals: RefreshIntervals,
}

impl ResourceRegistry {
    pub fn new(
        catalog: Arc<AccessCatalog>,
        upstream: Arc<dyn PolicySubjectSource>,
        cache: Arc<dyn KeyValueCache>,
    ) -> Self {
        Self {
            catalog,
            upstream,
            cache,
            policy_subjects: DashMap::new(),
            ready: AtomicBool::new(false),
            intervals: RefreshIntervals::default(),
        }
    }

    pub fn with_intervals(mut self, intervals: RefreshIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// True once every tracked resource has loaded in a single pass. Never
    /// reverts.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn catalog(&self) -> &AccessCatalog {
        &self.catalog
    }

    /// Every resource whose current policy-subject list contains `urn`, sorted.
    pub fn get_resource_ids_for_policy_subject(&self, urn: &str) -> Vec<String> {
        let mut resource_ids: Vec<String> = self
            .policy_subjects
            .iter()
            .filter(|entry| entry.value().iter().any(|subject| subject == urn))
            .map(|entry| entry.key().clone())
            .collect();
        resource_ids.sort();
        resource_ids
    }

    pub fn legacy_equivalents(&self, resource_id: &str) -> &[LegacyGrant] {
        self.catalog.legacy_equivalents(resource_id)
    }

    /// Load every tracked resource once. Returns whether all loads succeeded.
    pub async fn refresh(&self) -> bool {
        let resource_ids: Vec<&str> = self.catalog.resource_ids().collect();
        let outcomes = join_all(resource_ids.iter().map(|resource_id| async move {
            (*resource_id, self.load_policy_subjects(resource_id).await)
        }))
        .await;

        let mut all_loaded = true;
        for (resource_id, outcome) in outcomes {
            match outcome {
                Ok(subjects) => {
                    self.policy_subjects
                        .insert(resource_id.to_string(), Arc::new(subjects));
                }
                Err(e) => {
                    all_loaded = false;
                    tracing::error!(
                        resource_id = %resource_id,
                        error = %e,
                        "Failed to load policy subjects, keeping previous mapping"
                    );
                }
            }
        }

        if all_loaded {
            record_registry_refresh("ok");
            if !self.ready.swap(true, Ordering::AcqRel) {
                tracing::info!(
                    resources = resource_ids.len(),
                    "Resource registry loaded, marking ready"
                );
            }
        } else {
            record_registry_refresh("partial");
        }

        all_loaded
    }

    async fn load_policy_subjects(&self, resource_id: &str) -> Result<Vec<String>, SourceError> {
        let key = format!("{}:{}", POLICY_SUBJECTS_KEY_PREFIX, resource_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(subjects) => return Ok(subjects),
                Err(e) => {
                    tracing::warn!(resource_id = %resource_id, error = %e, "Cached policy subjects unreadable")
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(resource_id = %resource_id, error = %e, "Policy subject cache read failed")
            }
        }

        let subjects = match self.upstream.fetch_policy_subjects(resource_id).await {
            Ok(subjects) => {
                record_upstream_call("registry", "ok");
                subjects
            }
            Err(e) => {
                record_upstream_call("registry", e.kind());
                return Err(e);
            }
        };

        match serde_json::to_string(&subjects) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, &raw, POLICY_SUBJECTS_TTL).await {
                    tracing::warn!(resource_id = %resource_id, error = %e, "Policy subject cache write failed");
                }
            }
            Err(e) => {
                tracing::warn!(resource_id = %resource_id, error = %e, "Failed to serialize policy subjects")
            }
        }

        Ok(subjects)
    }

    /// Refresh until `shutdown` is cancelled: fast retries while not ready,
    /// slow cadence afterwards.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!("Starting resource registry refresh loop");

        loop {
            self.refresh().await;

            let delay = if self.is_ready() {
                self.intervals.ready
            } else {
                self.intervals.not_ready
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Resource registry refresh loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MockCache;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog() -> Arc<AccessCatalog> {
        Arc::new(AccessCatalog::new(
            vec![],
            [
                ("test-fager".to_string(), vec![LegacyGrant::new("5810", "1")]),
                ("nav_rekruttering_kandidater".to_string(), vec![]),
            ],
        ))
    }

    fn both_resources() -> StaticPolicySubjects {
        StaticPolicySubjects::new([
            (
                "test-fager",
                vec!["urn:altinn:rolecode:dagl", "urn:altinn:accesspackage:regnskap"],
            ),
            ("nav_rekruttering_kandidater", vec!["urn:altinn:rolecode:dagl"]),
        ])
    }

    #[tokio::test]
    async fn test_not_ready_until_full_pass() {
        let partial = StaticPolicySubjects::new([("test-fager", vec!["urn:altinn:rolecode:dagl"])]);
        let registry = ResourceRegistry::new(catalog(), Arc::new(partial), Arc::new(MockCache::new()));

        assert!(!registry.is_ready());
        assert!(!registry.refresh().await);
        assert!(!registry.is_ready());
        assert_eq!(
            registry.get_resource_ids_for_policy_subject("urn:altinn:rolecode:dagl"),
            vec!["test-fager".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ready_after_full_pass() {
        let registry = ResourceRegistry::new(
            catalog(),
            Arc::new(both_resources()),
            Arc::new(MockCache::new()),
        );

        assert!(registry.refresh().await);
        assert!(registry.is_ready());
        assert_eq!(
            registry.get_resource_ids_for_policy_subject("urn:altinn:rolecode:dagl"),
            vec![
                "nav_rekruttering_kandidater".to_string(),
                "test-fager".to_string()
            ]
        );
        assert_eq!(
            registry.get_resource_ids_for_policy_subject("urn:altinn:accesspackage:regnskap"),
            vec!["test-fager".to_string()]
        );
        assert!(registry.get_resource_ids_for_policy_subject("urn:altinn:rolecode:revi").is_empty());
        assert_eq!(registry.legacy_equivalents("test-fager"), &[LegacyGrant::new("5810", "1")]);
    }

    #[tokio::test]
    async fn test_stays_ready_and_keeps_stale_mapping_on_failure() {
        let server = MockServer::start().await;
        let upstream = Arc::new(HttpPolicySubjectSource::new(&RegistryConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap());

        Mock::given(method("GET"))
            .and(path("/resourceregistry/api/v1/resource/test-fager/policy/subjects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "links": {},
                "data": [{"type": "urn:altinn:rolecode", "value": "dagl", "urn": "urn:altinn:rolecode:dagl"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resourceregistry/api/v1/resource/nav_rekruttering_kandidater/policy/subjects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        // No cache hits, so the second pass goes upstream and gets 404s.
        let cache = Arc::new(MockCache::failing());
        let registry = ResourceRegistry::new(catalog(), upstream, cache);

        assert!(registry.refresh().await);
        assert!(registry.is_ready());

        assert!(!registry.refresh().await);
        assert!(registry.is_ready());
        assert_eq!(
            registry.get_resource_ids_for_policy_subject("urn:altinn:rolecode:dagl"),
            vec!["test-fager".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prefers_cached_policy_subjects() {
        let cache = Arc::new(MockCache::new());
        cache.insert_raw("policy-subjects:test-fager", r#"["urn:altinn:rolecode:lede"]"#);
        cache.insert_raw("policy-subjects:nav_rekruttering_kandidater", "[]");

        let registry = ResourceRegistry::new(
            catalog(),
            Arc::new(StaticPolicySubjects::default()),
            cache.clone(),
        );

        assert!(registry.refresh().await);
        assert_eq!(
            registry.get_resource_ids_for_policy_subject("urn:altinn:rolecode:lede"),
            vec!["test-fager".to_string()]
        );
        assert_eq!(cache.set_count(), 0);
    }

    #[tokio::test]
    async fn test_populates_cache_after_upstream_fetch() {
        let cache = Arc::new(MockCache::new());
        let registry = ResourceRegistry::new(catalog(), Arc::new(both_resources()), cache.clone());

        registry.refresh().await;

        assert_eq!(cache.set_count(), 2);
        assert!(cache.contains("policy-subjects:test-fager"));
    }

    /// Times out on the first `failures` calls, then delegates.
    struct FlakySource {
        failures: usize,
        calls: std::sync::atomic::AtomicUsize,
        inner: StaticPolicySubjects,
    }

    #[async_trait]
    impl PolicySubjectSource for FlakySource {
        async fn fetch_policy_subjects(
            &self,
            resource_id: &str,
        ) -> Result<Vec<String>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SourceError::Timeout(format!("attempt {}", call + 1)));
            }
            self.inner.fetch_policy_subjects(resource_id).await
        }
    }

    #[tokio::test]
    async fn test_run_loop_retries_failed_passes_until_ready() {
        let source = Arc::new(FlakySource {
            failures: 3,
            calls: std::sync::atomic::AtomicUsize::new(0),
            inner: both_resources(),
        });
        let registry = Arc::new(
            ResourceRegistry::new(catalog(), source.clone(), Arc::new(MockCache::new()))
                .with_intervals(RefreshIntervals {
                    ready: Duration::from_secs(60),
                    not_ready: Duration::from_millis(5),
                }),
        );
        let shutdown = CancellationToken::new();
        let handle = registry.spawn(shutdown.clone());

        for _ in 0..100 {
            if registry.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(registry.is_ready());
        assert!(source.calls.load(Ordering::SeqCst) > 3);
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_becomes_ready_and_stops_on_cancel() {
        let registry = Arc::new(
            ResourceRegistry::new(catalog(), Arc::new(both_resources()), Arc::new(MockCache::new()))
                .with_intervals(RefreshIntervals {
                    ready: Duration::from_millis(20),
                    not_ready: Duration::from_millis(5),
                }),
        );
        let shutdown = CancellationToken::new();
        let handle = registry.spawn(shutdown.clone());

        for _ in 0..50 {
            if registry.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_ready());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }
}
