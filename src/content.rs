//! Candidate-content collaborator seam.
//!
//! The core never fetches trivia content itself; it asks a [`ContentSource`]
//! for N candidate items and tolerates partial results. How items are found
//! and filtered is the collaborator's concern, exactly as connection setup
//! is kept out of a transport abstraction.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::protocol::ContentItem;

/// Retry attempts before a fetch is declared unavailable.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Base delay between retries; doubles per attempt.
pub const FETCH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Failure reported by a content collaborator.
#[derive(Debug, Error)]
#[error("content fetch failed: {0}")]
pub struct ContentError(pub String);

/// Capability to fetch candidate trivia items.
///
/// Implementations may return fewer than `count` items; callers must
/// tolerate partial results. Zero results should be reported as an error so
/// the retry layer can distinguish "nothing yet" from "nothing ever".
///
/// # Object Safety
///
/// The trait is object-safe; the room runtime holds an `Arc<dyn
/// ContentSource>`.
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    /// Fetch up to `count` candidate items.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError`] when the upstream source is unreachable or
    /// produced nothing usable.
    async fn fetch_candidates(&self, count: usize) -> Result<Vec<ContentItem>, ContentError>;
}

/// Fetch with bounded retries and doubling backoff.
///
/// Returns `None` once every attempt has failed or come back empty; the
/// caller surfaces that as a per-player "content unavailable" state rather
/// than failing the room.
pub async fn fetch_with_retry(source: &dyn ContentSource, count: usize) -> Option<Vec<ContentItem>> {
    let mut delay = FETCH_BACKOFF_BASE;
    for attempt in 1..=FETCH_ATTEMPTS {
        match source.fetch_candidates(count).await {
            Ok(items) if !items.is_empty() => return Some(items),
            Ok(_) => {
                warn!("content source returned no items (attempt {attempt}/{FETCH_ATTEMPTS})");
            }
            Err(e) => {
                warn!("content fetch failed (attempt {attempt}/{FETCH_ATTEMPTS}): {e}");
            }
        }
        if attempt < FETCH_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn item(n: u32) -> ContentItem {
        ContentItem {
            id: n.to_string(),
            title: format!("Item {n}"),
            body: "A body long enough to summarize.".into(),
            source_url: format!("https://example.test/{n}"),
        }
    }

    /// Fails a scripted number of times before succeeding.
    struct FlakySource {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ContentSource for FlakySource {
        async fn fetch_candidates(
            &self,
            count: usize,
        ) -> Result<Vec<ContentItem>, ContentError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ContentError("scripted failure".into()));
            }
            Ok((0..count as u32).map(item).collect())
        }
    }

    struct EmptySource;

    #[async_trait]
    impl ContentSource for EmptySource {
        async fn fetch_candidates(
            &self,
            _count: usize,
        ) -> Result<Vec<ContentItem>, ContentError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failure() {
        let source = FlakySource {
            failures: AtomicU32::new(2),
        };
        let items = fetch_with_retry(&source, 4).await;
        assert_eq!(items.unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_exhaust_retries() {
        let items = fetch_with_retry(&EmptySource, 4).await;
        assert!(items.is_none());
    }
}
