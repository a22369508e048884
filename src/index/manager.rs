//! Index orchestration: embedding, storage, search and persistence.
//!
//! Vector positions are an internal detail. The vector at position `p` always
//! belongs to the chunk with the `(p + 1)`-th smallest live chunk ID: new
//! vectors are appended in ID order, and deletions rebuild the store from the
//! survivors in ascending ID order.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingError};
use crate::index::catalog::{Catalog, CatalogError, ChunkId};
use crate::index::preprocess;
use crate::index::snapshot::{SnapshotCodec, SnapshotError};
use crate::index::vectors::{VectorError, VectorStore};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("No content chunks provided")]
    EmptyInput,

    #[error("{0}")]
    Vectors(#[from] VectorError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Index misaligned: {vectors} vectors for {chunks} chunks")]
    Misaligned { vectors: usize, chunks: usize },
}

/// Vectors, catalog and ID counter: everything the snapshot holds.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexState {
    vectors: VectorStore,
    catalog: Catalog,
    next_id: ChunkId,
}

impl IndexState {
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: VectorStore::new(dimensions),
            catalog: Catalog::new(),
            next_id: 0,
        }
    }

    pub(crate) fn from_parts(vectors: VectorStore, catalog: Catalog, next_id: ChunkId) -> Self {
        Self {
            vectors,
            catalog,
            next_id,
        }
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn next_id(&self) -> ChunkId {
        self.next_id
    }

    /// Live chunk IDs in position order, after checking both sides agree on size.
    fn positions(&self) -> Result<Vec<ChunkId>, IndexError> {
        let ids = self.catalog.ids_ascending();
        if ids.len() != self.vectors.len() {
            return Err(IndexError::Misaligned {
                vectors: self.vectors.len(),
                chunks: ids.len(),
            });
        }
        Ok(ids)
    }

    /// Commit already-embedded chunks under `url`, assigning fresh IDs in order.
    fn insert(&mut self, url: &str, embedded: Vec<(&str, Vec<f32>)>) -> Result<(), IndexError> {
        let mut batch = Vec::with_capacity(embedded.len());
        for (text, vector) in embedded {
            let id = self.next_id;
            self.catalog.put(id, url, text)?;
            self.next_id += 1;
            batch.push(vector);
        }

        self.vectors.append(&batch)?;
        Ok(())
    }

    /// Drop every chunk of `url` and rebuild the vector store without them.
    ///
    /// The keep mask is computed from the ID order *before* any record is
    /// removed, since that is the order the current store is laid out in.
    fn remove_url(&mut self, url: &str) -> Result<Vec<ChunkId>, IndexError> {
        let doomed: HashSet<ChunkId> = self.catalog.ids_for(url).iter().copied().collect();
        let keep: Vec<bool> = self
            .positions()?
            .iter()
            .map(|id| !doomed.contains(id))
            .collect();

        let survivors: Vec<Vec<f32>> = self
            .vectors
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| **keep)
            .map(|(vector, _)| vector.to_vec())
            .collect();
        self.vectors.rebuild_from(&survivors)?;

        Ok(self.catalog.remove_url(url))
    }

    fn clear(&mut self) {
        self.vectors.clear();
        self.catalog.clear();
    }
}

/// Options the manager needs from the application config.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub dimensions: usize,
    pub min_chunk_chars: usize,
    pub strict_load: bool,
}

impl From<&Config> for IndexOptions {
    fn from(config: &Config) -> Self {
        Self {
            dimensions: config.embedding.dimensions,
            min_chunk_chars: config.index.min_chunk_chars,
            strict_load: config.index.strict_load,
        }
    }
}

/// How the manager's state was obtained at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No snapshot existed.
    Fresh,
    /// The snapshot was loaded.
    Restored { chunks: usize },
    /// The snapshot was unreadable and has been moved to `quarantined`.
    Recovered { quarantined: PathBuf },
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub text: String,
    /// `exp(-squared_distance)`, in `(0, 1]`
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub urls: usize,
    pub next_id: ChunkId,
    pub dimensions: usize,
}

/// Similarity score for a squared L2 distance.
///
/// Exponential decay: 0 maps to 1.0 and larger distances approach 0. This is a
/// ranking heuristic, not a probability.
pub fn score(squared_distance: f32) -> f32 {
    (-squared_distance).exp()
}

/// Owns the index state and runs every operation against it.
///
/// Mutating operations take `&mut self`; callers share the manager behind a
/// single `RwLock` so writers (including their embedding calls and the
/// snapshot save) are serialized and searches see a consistent state.
pub struct IndexManager {
    state: IndexState,
    embedder: Arc<dyn Embedder>,
    codec: SnapshotCodec,
    options: IndexOptions,
}

impl IndexManager {
    /// Create a manager from the snapshot at `codec`'s path.
    ///
    /// A missing snapshot starts an empty index. A corrupt one either fails
    /// (`strict_load`) or is moved aside and the index starts empty.
    pub fn open(
        codec: SnapshotCodec,
        embedder: Arc<dyn Embedder>,
        options: IndexOptions,
    ) -> Result<(Self, LoadOutcome), IndexError> {
        let (state, outcome) = match codec.load(options.dimensions) {
            Ok(Some(state)) => {
                log::info!(
                    "Loaded index with {} vectors from {}",
                    state.vectors.len(),
                    codec.path().display()
                );
                let chunks = state.catalog.len();
                (state, LoadOutcome::Restored { chunks })
            }
            Ok(None) => {
                log::info!("No existing index at {}, starting fresh", codec.path().display());
                (IndexState::new(options.dimensions), LoadOutcome::Fresh)
            }
            Err(e) if e.is_corruption() && !options.strict_load => {
                log::error!("Error loading index {}: {}", codec.path().display(), e);
                let quarantined = codec.quarantine()?;
                log::warn!(
                    "Moved unreadable snapshot to {}, starting with an empty index",
                    quarantined.display()
                );
                (
                    IndexState::new(options.dimensions),
                    LoadOutcome::Recovered { quarantined },
                )
            }
            Err(e) => {
                log::error!("Failed to load index {}: {}", codec.path().display(), e);
                return Err(e.into());
            }
        };

        Ok((
            Self {
                state,
                embedder,
                codec,
                options,
            },
            outcome,
        ))
    }

    #[cfg(test)]
    pub fn state(&self) -> &IndexState {
        &self.state
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            chunks: self.state.catalog.len(),
            urls: self.state.catalog.url_count(),
            next_id: self.state.next_id,
            dimensions: self.state.vectors.dimensions(),
        }
    }

    /// Index `chunks` under `url`, replacing whatever the URL had before.
    ///
    /// Chunks below the minimum length are skipped. Every remaining chunk is
    /// embedded before anything is modified, so an embedding failure leaves
    /// the index (and the previous content of `url`) untouched.
    ///
    /// Returns the number of chunks indexed.
    pub fn add_document<S: AsRef<str>>(
        &mut self,
        url: &str,
        chunks: &[S],
    ) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyInput);
        }

        let accepted = preprocess::indexable_chunks(chunks, self.options.min_chunk_chars);
        let skipped = chunks.len() - accepted.len();

        let mut embedded = Vec::with_capacity(accepted.len());
        for text in accepted {
            let vector = self.embed_checked(text)?;
            embedded.push((text, vector));
        }

        let indexed = embedded.len();
        self.commit(|state| {
            if state.catalog.contains_url(url) {
                let removed = state.remove_url(url)?;
                log::info!("Replacing {} chunks previously indexed for {url}", removed.len());
            }
            state.insert(url, embedded)
        })?;

        log::info!("Indexed {indexed} chunks for {url} ({skipped} skipped as too short)");
        Ok(indexed)
    }

    /// Find the `k` chunks closest to `query`.
    ///
    /// An empty index returns no results without calling the embedder.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.state.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_checked(query)?;
        let k = k.min(self.state.vectors.len());
        let neighbors = self.state.vectors.search(&query_vector, k)?;

        let positions = self.state.positions()?;
        neighbors
            .into_iter()
            .map(|neighbor| {
                let id = positions[neighbor.position];
                let record = self.state.catalog.get(id)?;
                Ok(SearchHit {
                    url: record.url.clone(),
                    text: record.text.clone(),
                    score: score(neighbor.distance),
                })
            })
            .collect()
    }

    /// Remove every chunk of `url`.
    ///
    /// Returns `false` (and changes nothing) if the URL is not indexed.
    pub fn delete_url(&mut self, url: &str) -> Result<bool, IndexError> {
        if !self.state.catalog.contains_url(url) {
            log::debug!("delete: {url} is not indexed");
            return Ok(false);
        }

        let removed = self.commit(|state| state.remove_url(url))?;

        log::info!("Deleted {} chunks for {url}", removed.len());
        Ok(true)
    }

    /// Remove everything. Chunk IDs keep counting from where they were.
    pub fn clear(&mut self) -> Result<(), IndexError> {
        let chunks = self.state.catalog.len();
        self.commit(|state| {
            state.clear();
            Ok(())
        })?;

        log::info!("Cleared index ({chunks} chunks removed)");
        Ok(())
    }

    /// Embed `text`, treating a vector of the wrong length as a failure of
    /// the embedding service rather than of the caller.
    fn embed_checked(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let vector = self.embedder.embed(text)?;
        self.state
            .vectors
            .check_dimensions(&vector)
            .map_err(|VectorError::DimensionMismatch { expected, got }| {
                EmbeddingError::DimensionMismatch { expected, got }
            })?;
        Ok(vector)
    }

    /// Apply `change` and save the result.
    ///
    /// If either step fails the state is rolled back, so memory always
    /// matches the last snapshot that was written successfully.
    fn commit<T>(
        &mut self,
        change: impl FnOnce(&mut IndexState) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let previous = self.state.clone();

        let result = change(&mut self.state).and_then(|value| {
            self.persist()?;
            Ok(value)
        });
        if result.is_err() {
            self.state = previous;
        }

        result
    }

    fn persist(&self) -> Result<(), IndexError> {
        self.codec.save(&self.state).map_err(|e| {
            log::error!("Error saving index, changes rolled back: {e}");
            e.into()
        })
    }
}
