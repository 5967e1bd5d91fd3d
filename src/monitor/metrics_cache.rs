use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::debug;

/// Rendered metrics of one completed collection cycle
#[derive(Clone, Debug)]
pub struct CachedMetrics {
    /// Exposition text served on /metrics
    pub text: String,
    /// Number of samples rendered
    pub sample_count: usize,
    /// When the cycle that produced this snapshot finished
    pub collected_at: SystemTime,
}

/// Latest published metrics snapshot
///
/// Readers clone the current `Arc` under a brief lock and never wait on a
/// collection cycle. The collector builds the next snapshot on its own and
/// swaps it in with `publish`, so readers see either the previous cycle or
/// the new one, never a partial one.
#[derive(Clone)]
pub struct MetricsCache {
    current: Arc<Mutex<Option<Arc<CachedMetrics>>>>,
}

impl MetricsCache {
    /// Create a new empty metrics cache
    pub fn new() -> Self {
        MetricsCache {
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the latest snapshot, `None` until the first cycle completes
    pub async fn get_metrics(&self) -> Option<Arc<CachedMetrics>> {
        let current = self.current.lock().await;
        current.clone()
    }

    /// Replace the served snapshot
    pub async fn publish(&self, text: String, sample_count: usize) {
        let snapshot = Arc::new(CachedMetrics {
            text,
            sample_count,
            collected_at: SystemTime::now(),
        });

        let mut current = self.current.lock().await;
        *current = Some(snapshot);
        debug!(sample_count = sample_count, "Metrics snapshot swapped");
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_until_first_publish() {
        let cache = MetricsCache::new();
        assert!(cache.get_metrics().await.is_none());

        cache.publish("up 1\n".to_string(), 1).await;
        let snapshot = cache.get_metrics().await.unwrap();
        assert_eq!(snapshot.text, "up 1\n");
        assert_eq!(snapshot.sample_count, 1);
    }

    #[tokio::test]
    async fn test_publish_replaces_snapshot() {
        let cache = MetricsCache::new();
        cache.publish("first\n".to_string(), 1).await;
        let held = cache.get_metrics().await.unwrap();

        cache.publish("second\n".to_string(), 2).await;

        // Readers holding the old snapshot keep it intact
        assert_eq!(held.text, "first\n");
        assert_eq!(cache.get_metrics().await.unwrap().text, "second\n");
    }

    #[tokio::test]
    async fn test_clones_share_snapshot() {
        let cache = MetricsCache::new();
        let reader = cache.clone();
        cache.publish("shared\n".to_string(), 1).await;
        assert_eq!(reader.get_metrics().await.unwrap().text, "shared\n");
    }
}
