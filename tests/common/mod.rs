//! Shared helpers for integration tests.
#![allow(dead_code)]

use counterfact_server::ContentItem;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic content item factory.
pub fn item(prefix: &str, n: usize) -> ContentItem {
    ContentItem {
        id: format!("{prefix}-{n}"),
        title: format!("Topic {prefix} {n}"),
        body: format!("Everything about topic {prefix} {n}. It has a storied history."),
        source_url: format!("https://example.test/{prefix}/{n}"),
    }
}

/// A batch of items for one player's offer.
pub fn offer(prefix: &str, count: usize) -> Vec<ContentItem> {
    (0..count).map(|n| item(prefix, n)).collect()
}
