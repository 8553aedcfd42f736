//! Catalog access abstraction.
//!
//! [`CatalogSource`] is the seam between the engine and the external catalog.
//! The production implementation is [`super::anilist::AnilistClient`]; tests
//! plug in an in-memory catalog.

use std::time::Duration;

use thiserror::Error;

use crate::config::CatalogConfig;
use crate::domain::{CatalogEntry, TitleId};

/// Why a single request attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("service unavailable (HTTP 403)")]
    Unavailable,

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("catalog reported errors: {0}")]
    Api(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl AttemptFailure {
    /// How long to wait before the next attempt.
    #[must_use]
    pub fn backoff(&self, config: &CatalogConfig) -> Duration {
        match self {
            Self::Unavailable => config.unavailable_wait(),
            Self::RateLimited { retry_after } => {
                retry_after.unwrap_or_else(|| config.rate_limit_fallback())
            }
            Self::Status(_) | Self::Api(_) | Self::Malformed(_) | Self::Transport(_) => {
                config.error_wait()
            }
        }
    }
}

/// Typed failure returned once the retry budget of a request is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("{request} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        request: String,
        attempts: u32,
        last: AttemptFailure,
    },

    #[error("batch of {size} ids exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// One page of the "recently updated" listing.
#[derive(Debug, Clone, Default)]
pub struct MediaPage {
    pub entries: Vec<CatalogEntry>,
    /// Records the catalog returned that failed validation and were dropped.
    pub rejected: usize,
    pub per_page: u32,
    pub has_next_page: bool,
}

impl MediaPage {
    /// Number of records the catalog actually returned, valid or not.
    #[must_use]
    pub fn returned(&self) -> usize {
        self.entries.len() + self.rejected
    }

    /// A page shorter than requested while more pages are claimed is suspect.
    #[must_use]
    pub fn is_suspiciously_short(&self, requested: u32) -> bool {
        self.has_next_page && self.returned() < requested as usize
    }
}

#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Titles ordered by last-modified time, newest first.
    async fn updated_page(&self, page: u32, per_page: u32) -> Result<MediaPage, CatalogError>;

    /// Bulk lookup; `ids` must not exceed [`CatalogSource::batch_size`].
    async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// A single title with its relation edges, `None` if the catalog does not know it.
    async fn media_with_relations(&self, id: TitleId)
    -> Result<Option<CatalogEntry>, CatalogError>;

    async fn user_id(&self, username: &str) -> Result<Option<i64>, CatalogError>;

    async fn watched_titles(&self, username: &str) -> Result<Vec<TitleId>, CatalogError>;

    fn batch_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CatalogConfig {
        CatalogConfig {
            unavailable_wait_secs: 120,
            rate_limit_fallback_secs: 31,
            error_wait_secs: 15,
            ..CatalogConfig::default()
        }
    }

    #[test]
    fn backoff_follows_failure_class() {
        let config = fast_config();
        assert_eq!(
            AttemptFailure::Unavailable.backoff(&config),
            Duration::from_secs(120)
        );
        assert_eq!(
            AttemptFailure::RateLimited { retry_after: None }.backoff(&config),
            Duration::from_secs(31)
        );
        assert_eq!(
            AttemptFailure::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
            .backoff(&config),
            Duration::from_secs(7)
        );
        assert_eq!(
            AttemptFailure::Malformed("missing Page".into()).backoff(&config),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn short_page_detection() {
        let page = MediaPage {
            entries: Vec::new(),
            rejected: 30,
            per_page: 50,
            has_next_page: true,
        };
        assert!(page.is_suspiciously_short(50));

        let last_page = MediaPage {
            has_next_page: false,
            ..page
        };
        assert!(!last_page.is_suspiciously_short(50));
    }
}
