//! Dense positional vector storage with exact nearest-neighbor search.
//!
//! All embeddings live in one contiguous buffer: `[v0_d0, v0_d1, ..., v1_d0, ...]`.
//! The store knows nothing about chunk IDs, a vector is addressed only by its
//! position. Mapping positions back to chunks is the manager's job.

use std::cmp::Ordering;

/// A single search hit: the position of a stored vector and its squared
/// Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Contiguous storage of fixed-dimension `f32` vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    data: Vec<f32>,
    dimensions: usize,
}

impl VectorStore {
    /// Create an empty store for vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        assert!(dimensions > 0, "vector dimensions must be positive");
        Self {
            data: Vec::new(),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector stored at `position`.
    #[cfg(test)]
    pub fn get(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Iterate over stored vectors in position order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions)
    }

    /// Fail with `DimensionMismatch` unless `vector` has exactly `dimensions` components.
    pub fn check_dimensions(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Append a batch of vectors to the end of the store, in order.
    ///
    /// The whole batch is validated first; on error nothing is appended.
    pub fn append<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<(), VectorError> {
        for vector in vectors {
            self.check_dimensions(vector.as_ref())?;
        }

        self.data.reserve(vectors.len() * self.dimensions);
        for vector in vectors {
            self.data.extend_from_slice(vector.as_ref());
        }

        Ok(())
    }

    /// Replace the entire contents with `vectors`, in order.
    ///
    /// The replacement buffer is built aside and swapped in only after every
    /// vector has been validated.
    pub fn rebuild_from<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<(), VectorError> {
        let mut data = Vec::with_capacity(vectors.len() * self.dimensions);
        for vector in vectors {
            let vector = vector.as_ref();
            self.check_dimensions(vector)?;
            data.extend_from_slice(vector);
        }

        self.data = data;
        Ok(())
    }

    /// Remove every vector.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Find the `k` stored vectors closest to `query` by squared L2 distance.
    ///
    /// Results are ordered by ascending distance, ties by ascending position.
    /// `k` is clamped to the store size, and an empty store yields no results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimensions(query)?;

        let mut neighbors: Vec<Neighbor> = self
            .iter()
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        let k = k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_by(compare_neighbors);

        Ok(neighbors)
    }

    /// Copy the contents out as one row per vector.
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.iter().map(<[f32]>::to_vec).collect()
    }
}

/// Squared Euclidean distance between two equally sized vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.position.cmp(&b.position))
}

/// Errors that can occur during vector store operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
