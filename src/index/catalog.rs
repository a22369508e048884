//! Chunk bookkeeping: which chunk ID holds which URL and text, and which
//! chunk IDs each URL owns.

use std::collections::BTreeMap;

/// Stable external handle for an indexed chunk.
pub type ChunkId = u64;

/// A single indexed passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub url: String,
    pub text: String,
}

/// Records keyed by chunk ID plus a URL -> chunk IDs index.
///
/// Records are kept in a `BTreeMap`, so [`Catalog::ids_ascending`] is a real
/// sort on ID rather than insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    records: BTreeMap<ChunkId, ChunkRecord>,
    urls: BTreeMap<String, Vec<ChunkId>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record and register it under its URL.
    pub fn put(&mut self, id: ChunkId, url: &str, text: &str) -> Result<(), CatalogError> {
        if self.records.contains_key(&id) {
            return Err(CatalogError::DuplicateId(id));
        }

        self.records.insert(
            id,
            ChunkRecord {
                id,
                url: url.to_string(),
                text: text.to_string(),
            },
        );
        self.urls.entry(url.to_string()).or_default().push(id);

        Ok(())
    }

    pub fn get(&self, id: ChunkId) -> Result<&ChunkRecord, CatalogError> {
        self.records.get(&id).ok_or(CatalogError::NotFound(id))
    }

    /// Remove a URL and every record it owns, returning the removed IDs.
    ///
    /// An unknown URL removes nothing.
    pub fn remove_url(&mut self, url: &str) -> Vec<ChunkId> {
        let ids = self.urls.remove(url).unwrap_or_default();
        for id in &ids {
            self.records.remove(id);
        }
        ids
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains_key(url)
    }

    /// Chunk IDs owned by `url`, in insertion order.
    pub fn ids_for(&self, url: &str) -> &[ChunkId] {
        self.urls.get(url).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every live chunk ID in ascending order.
    pub fn ids_ascending(&self) -> Vec<ChunkId> {
        self.records.keys().copied().collect()
    }

    pub fn max_id(&self) -> Option<ChunkId> {
        self.records.keys().next_back().copied()
    }

    /// Iterate over records in ascending ID order.
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.records.values()
    }

    /// Iterate over URLs and the IDs they own.
    pub fn urls(&self) -> impl Iterator<Item = (&str, &[ChunkId])> {
        self.urls
            .iter()
            .map(|(url, ids)| (url.as_str(), ids.as_slice()))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn url_count(&self) -> usize {
        self.urls.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.urls.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("chunk {0} is already indexed")]
    DuplicateId(ChunkId),

    #[error("chunk {0} not found")]
    NotFound(ChunkId),
}
