//! Vector index over text chunks.
//!
//! # Architecture
//!
//! - `vectors`: contiguous embedding storage with exact L2 search
//! - `catalog`: chunk ID -> (url, text) records and the per-URL ID index
//! - `manager`: composes both, owns the position/ID alignment and persistence
//! - `snapshot`: JSON snapshot of the whole index
//! - `preprocess`: filtering of chunks too short to index

mod catalog;
mod manager;
mod preprocess;
mod snapshot;
mod vectors;

#[cfg(test)]
pub use catalog::CatalogError;
pub use manager::{IndexError, IndexManager, IndexOptions, IndexStats, LoadOutcome, SearchHit};
pub use preprocess::DEFAULT_MIN_CHUNK_CHARS;
pub use snapshot::SnapshotCodec;
