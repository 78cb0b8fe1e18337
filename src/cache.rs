//! Explicit memoization
//!
//! The normalized dataset is cached on the SHA-256 of the uploaded bytes;
//! aggregate views are cached on their `(FilterSpec, DimensionSpec)` and
//! dropped whenever the dataset changes.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::aggregate::AggregateTable;
use crate::dimensions::{DimensionSpec, FilterSpec};
use crate::ingestion::NormalizedDataset;

/// Hex SHA-256 over the given byte slices. Each part is length-prefixed so
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn content_key(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Holds the dataset of the most recent upload.
#[derive(Debug, Default)]
pub struct DatasetCache {
    entry: Option<(String, Arc<NormalizedDataset>)>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<NormalizedDataset>> {
        match &self.entry {
            Some((cached, data)) if cached == key => Some(Arc::clone(data)),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: String, data: Arc<NormalizedDataset>) {
        self.entry = Some((key, data));
    }

    pub fn current(&self) -> Option<Arc<NormalizedDataset>> {
        self.entry.as_ref().map(|(_, data)| Arc::clone(data))
    }

    pub fn current_key(&self) -> Option<&str> {
        self.entry.as_ref().map(|(key, _)| key.as_str())
    }

    pub fn invalidate(&mut self) {
        if self.entry.take().is_some() {
            debug!("Dataset cache invalidated");
        }
    }
}

#[derive(Debug, Default)]
pub struct AggregationCache {
    entries: HashMap<(FilterSpec, DimensionSpec), Arc<AggregateTable>>,
    hits: u64,
    misses: u64,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, filters: &FilterSpec, dims: &DimensionSpec) -> Option<Arc<AggregateTable>> {
        // HashMap lookup on a tuple key needs an owned tuple.
        let found = self.entries.get(&(filters.clone(), dims.clone())).cloned();
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    pub fn insert(&mut self, filters: FilterSpec, dims: DimensionSpec, table: Arc<AggregateTable>) {
        self.entries.insert((filters, dims), table);
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!("Dropping {} cached aggregate(s)", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::dimensions::Dimension;
    use polars::prelude::*;

    #[test]
    fn test_content_key_is_stable_and_part_aware() {
        let a = content_key(&["raw".as_bytes(), "index".as_bytes()]);
        assert_eq!(a, content_key(&["raw".as_bytes(), "index".as_bytes()]));
        assert_eq!(a.len(), 64);
        assert_ne!(
            content_key(&["ab".as_bytes(), "c".as_bytes()]),
            content_key(&["a".as_bytes(), "bc".as_bytes()])
        );
    }

    #[test]
    fn test_aggregation_cache_keys_on_both_specs() {
        let mut cache = AggregationCache::new();
        let filters = FilterSpec::new().with_values(Dimension::Media, ["PC"]);
        let dims = DimensionSpec::new([Dimension::Day]);

        assert!(cache.get(&filters, &dims).is_none());
        let rows = df! [
            "day" => ["2024-01-01"],
            "media" => ["PC"],
            "campaign" => ["A"],
            "keyword" => ["k"],
            "impressions" => [1.0],
            "clicks" => [1.0],
            "cost" => [1.0],
            "conversions" => [1.0],
            "revenue" => [1.0],
            "avg_rank" => [1.0]
        ]
        .unwrap();
        let table = aggregate(&rows, &dims, &filters).unwrap();
        cache.insert(filters.clone(), dims.clone(), Arc::new(table));

        assert!(cache.get(&filters, &dims).is_some());
        assert!(cache.get(&FilterSpec::new(), &dims).is_none());
        assert_eq!(cache.stats(), (1, 2));

        cache.clear();
        assert!(cache.is_empty());
    }
}
