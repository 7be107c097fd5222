use crate::query::DataQuery;
use crate::session::result::DataFrame;
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Storage for unpaginated dataframes, keyed by query.
///
/// Providers that talk to a remote store should swallow their I/O errors
/// and report a miss; the session does not special-case cache failures.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn retrieve(&self, query: &DataQuery) -> Option<DataFrame>;
    async fn store(&self, query: &DataQuery, data: &DataFrame);
}

/// Never stores anything
pub struct DummyProvider;

#[async_trait]
impl CacheProvider for DummyProvider {
    async fn retrieve(&self, _query: &DataQuery) -> Option<DataFrame> {
        None
    }

    async fn store(&self, _query: &DataQuery, _data: &DataFrame) {}
}

/// Keeps up to `capacity` dataframes in memory, evicting the oldest first
pub struct MemoryProvider {
    capacity: usize,
    entries: Mutex<MemoryEntries>,
}

#[derive(Default)]
struct MemoryEntries {
    order: VecDeque<String>,
    frames: HashMap<String, DataFrame>,
}

impl MemoryProvider {
    pub fn new(capacity: usize) -> Self {
        MemoryProvider {
            capacity,
            entries: Mutex::new(MemoryEntries::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.frames.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    async fn retrieve(&self, query: &DataQuery) -> Option<DataFrame> {
        let entries = self.entries.lock().await;
        entries.frames.get(&query.key()).cloned()
    }

    async fn store(&self, query: &DataQuery, data: &DataFrame) {
        if self.capacity == 0 {
            return;
        }
        let key = query.key();
        let mut entries = self.entries.lock().await;
        if entries.frames.insert(key.clone(), data.clone()).is_none() {
            entries.order.push_back(key);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                debug!("Evicting cached result {}", oldest);
                entries.frames.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::trade_query;
    use crate::semantic_model::tests::fixture_schema;

    #[test_log::test(tokio::test)]
    async fn test_memory_provider_evicts_oldest() {
        let schema = fixture_schema();
        let provider = MemoryProvider::new(2);
        let queries: Vec<DataQuery> = ["Year", "Country", "Product"]
            .iter()
            .map(|level| trade_query(&schema, &[level], &["Trade Value"]))
            .collect();
        let frame = DataFrame::default();

        for query in &queries {
            provider.store(query, &frame).await;
        }

        assert_eq!(provider.len().await, 2);
        assert!(provider.retrieve(&queries[0]).await.is_none());
        assert_eq!(provider.retrieve(&queries[2]).await, Some(frame));
    }

    #[test_log::test(tokio::test)]
    async fn test_dummy_provider_misses() {
        let schema = fixture_schema();
        let query = trade_query(&schema, &["Year"], &["Trade Value"]);
        DummyProvider.store(&query, &DataFrame::default()).await;
        assert!(DummyProvider.retrieve(&query).await.is_none());
    }
}
