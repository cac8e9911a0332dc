pub mod aggregator;
pub mod cache;
pub mod legacy;
pub mod metrics;
pub mod modern;
pub mod registry;
pub mod tree_filter;

use thiserror::Error;

pub use aggregator::AccessAggregator;
pub use cache::{AccessCache, CacheError, KeyValueCache, MockCache, RedisCache, subject_cache_key};
pub use legacy::{HttpLegacySource, LegacyAccessResult, LegacyAccessSource, MockLegacySource};
pub use metrics::{get_metrics, init_metrics};
pub use modern::{HttpModernSource, MockModernSource, ModernAccessSource};
pub use registry::{
    HttpPolicySubjectSource, PolicySubjectSource, RefreshIntervals, ResourceRegistry,
    StaticPolicySubjects,
};
pub use tree_filter::filter_tree;

/// Failure of a single call to an upstream platform.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::Timeout(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Timeout(_) => "timeout",
            SourceError::Status { .. } => "status",
            SourceError::Transport(_) => "transport",
            SourceError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

/// Read a response body, mapping non-success statuses to `SourceError::Status`.
pub(crate) async fn read_success_body(response: reqwest::Response) -> Result<String, SourceError> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(SourceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
