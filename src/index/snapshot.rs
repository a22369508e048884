//! JSON snapshot of the full index state.
//!
//! File format (one document, replaced whole on every save):
//!
//! ```text
//! {
//!   "url_to_ids": { "<url>": [<chunk id>, ...] },
//!   "id_to_data": { "<chunk id>": { "url": "...", "text": "..." } },
//!   "next_id": <int>,
//!   "vectors": [[<f32>; D], ...]        // ascending chunk id order
//! }
//! ```
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! snapshot, so a crash mid-save leaves the previous snapshot intact.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::index::catalog::{Catalog, CatalogError, ChunkId};
use crate::index::manager::IndexState;
use crate::index::vectors::{VectorError, VectorStore};

/// Errors that can occur during snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Inconsistent snapshot: {0}")]
    Inconsistent(String),

    #[error("Inconsistent snapshot: {0}")]
    Vectors(#[from] VectorError),

    #[error("Inconsistent snapshot: {0}")]
    Catalog(#[from] CatalogError),
}

impl SnapshotError {
    /// Whether the file exists but its content cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, SnapshotError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChunkData {
    url: String,
    text: String,
}

/// On-disk shape of the snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    url_to_ids: BTreeMap<String, Vec<ChunkId>>,
    #[serde(default)]
    id_to_data: BTreeMap<ChunkId, ChunkData>,
    #[serde(default)]
    next_id: ChunkId,
    #[serde(default)]
    vectors: Vec<Vec<f32>>,
}

impl SnapshotDocument {
    fn capture(state: &IndexState) -> Self {
        let url_to_ids = state
            .catalog()
            .urls()
            .map(|(url, ids)| (url.to_string(), ids.to_vec()))
            .collect();
        let id_to_data = state
            .catalog()
            .records()
            .map(|record| {
                (
                    record.id,
                    ChunkData {
                        url: record.url.clone(),
                        text: record.text.clone(),
                    },
                )
            })
            .collect();

        Self {
            url_to_ids,
            id_to_data,
            next_id: state.next_id(),
            vectors: state.vectors().to_rows(),
        }
    }

    /// Rebuild the in-memory state, checking every structural invariant the
    /// index relies on.
    fn into_state(self, dimensions: usize) -> Result<IndexState, SnapshotError> {
        if self.vectors.len() != self.id_to_data.len() {
            return Err(SnapshotError::Inconsistent(format!(
                "{} vectors for {} chunks",
                self.vectors.len(),
                self.id_to_data.len()
            )));
        }

        let mut vectors = VectorStore::new(dimensions);
        vectors.rebuild_from(&self.vectors)?;

        // BTreeMap iteration is ascending, which matches vector order
        let mut catalog = Catalog::new();
        for (id, data) in &self.id_to_data {
            catalog.put(*id, &data.url, &data.text)?;
        }

        // URLs whose chunks were all filtered out may be stored with no IDs
        let listed: Vec<(&String, &Vec<ChunkId>)> = self
            .url_to_ids
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        if listed.len() != catalog.url_count() {
            return Err(SnapshotError::Inconsistent(format!(
                "url index lists {} urls, chunks reference {}",
                listed.len(),
                catalog.url_count()
            )));
        }
        for (url, ids) in listed {
            let expected: HashSet<ChunkId> = catalog.ids_for(url).iter().copied().collect();
            let stored: HashSet<ChunkId> = ids.iter().copied().collect();
            if expected != stored || ids.len() != stored.len() {
                return Err(SnapshotError::Inconsistent(format!(
                    "url index for {url} does not match its chunks"
                )));
            }
        }

        if let Some(max_id) = catalog.max_id() {
            if self.next_id <= max_id {
                return Err(SnapshotError::Inconsistent(format!(
                    "next_id {} is not above highest chunk id {}",
                    self.next_id, max_id
                )));
            }
        }

        Ok(IndexState::from_parts(vectors, catalog, self.next_id))
    }
}

/// Reads and writes the index snapshot file.
pub struct SnapshotCodec {
    path: PathBuf,
}

impl SnapshotCodec {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot file exists yet.
    pub fn load(&self, dimensions: usize) -> Result<Option<IndexState>, SnapshotError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let document: SnapshotDocument = serde_json::from_slice(&bytes)?;
        document.into_state(dimensions).map(Some)
    }

    /// Save the full state, replacing the previous snapshot atomically.
    pub fn save(&self, state: &IndexState) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = sibling(&self.path, "tmp");
        let result = Self::write_to_file(&temp_path, &SnapshotDocument::capture(state))
            .and_then(|()| std::fs::rename(&temp_path, &self.path).map_err(SnapshotError::from));

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        log::debug!(
            "snapshot saved to {} ({} vectors)",
            self.path.display(),
            state.vectors().len()
        );

        Ok(())
    }

    /// Move an unreadable snapshot aside so the next save does not destroy it.
    pub fn quarantine(&self) -> Result<PathBuf, SnapshotError> {
        let target = sibling(&self.path, "corrupt");
        std::fs::rename(&self.path, &target)?;
        Ok(target)
    }

    fn write_to_file(path: &Path, document: &SnapshotDocument) -> Result<(), SnapshotError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer(&mut writer, document).map_err(std::io::Error::from)?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }
}

/// `index_data.json` -> `index_data.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> IndexState {
        let mut catalog = Catalog::new();
        catalog.put(0, "https://a.example", "alpha passage one").unwrap();
        catalog.put(2, "https://b.example", "beta passage").unwrap();
        catalog.put(3, "https://a.example", "alpha passage two").unwrap();

        let mut vectors = VectorStore::new(3);
        vectors
            .append(&[
                vec![0.1, 0.2, 0.3],
                vec![-1.5, 1e-7, 1234.5678],
                vec![0.333_333_34, 2.0, -0.0],
            ])
            .unwrap();

        IndexState::from_parts(vectors, catalog, 4)
    }

    #[test]
    fn test_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let codec = SnapshotCodec::new(tmp.path().join("index_data.json"));
        let state = sample_state();

        codec.save(&state).unwrap();
        assert!(codec.exists());

        let loaded = codec.load(3).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.vectors().get(1), state.vectors().get(1));
        assert_eq!(loaded.next_id(), 4);
    }

    #[test]
    fn test_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let codec = SnapshotCodec::new(tmp.path().join("absent.json"));

        assert!(codec.load(3).unwrap().is_none());
    }

    #[test]
    fn test_document_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let codec = SnapshotCodec::new(tmp.path().join("index_data.json"));
        codec.save(&sample_state()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(codec.path()).unwrap()).unwrap();
        assert_eq!(raw["next_id"], 4);
        assert_eq!(raw["url_to_ids"]["https://a.example"], serde_json::json!([0, 3]));
        assert_eq!(raw["id_to_data"]["2"]["url"], "https://b.example");
        assert_eq!(raw["id_to_data"]["2"]["text"], "beta passage");
        assert_eq!(raw["vectors"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_loads_document_written_by_reference_service() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(
            &path,
            r#"{"url_to_ids": {"https://x.example": [5], "https://empty.example": []},
                "id_to_data": {"5": {"url": "https://x.example", "text": "some text"}},
                "next_id": 6,
                "vectors": [[1.0, 0.5]]}"#,
        )
        .unwrap();

        let state = SnapshotCodec::new(path).load(2).unwrap().unwrap();
        assert_eq!(state.catalog().ids_ascending(), vec![5]);
        assert_eq!(state.catalog().get(5).unwrap().text, "some text");
        assert_eq!(state.vectors().get(0), Some(&[1.0, 0.5][..]));
        assert!(!state.catalog().contains_url("https://empty.example"));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = SnapshotCodec::new(path).load(3);
        assert!(matches!(result, Err(SnapshotError::Parse(_))));
        assert!(result.unwrap_err().is_corruption());
    }

    #[test]
    fn test_vector_count_mismatch_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(
            &path,
            r#"{"url_to_ids": {"u": [0]}, "id_to_data": {"0": {"url": "u", "text": "t"}},
                "next_id": 1, "vectors": []}"#,
        )
        .unwrap();

        let result = SnapshotCodec::new(path).load(2);
        assert!(matches!(result, Err(SnapshotError::Inconsistent(_))));
    }

    #[test]
    fn test_dimension_mismatch_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(
            &path,
            r#"{"url_to_ids": {"u": [0]}, "id_to_data": {"0": {"url": "u", "text": "t"}},
                "next_id": 1, "vectors": [[1.0, 2.0, 3.0]]}"#,
        )
        .unwrap();

        let result = SnapshotCodec::new(path).load(2);
        assert!(matches!(
            result,
            Err(SnapshotError::Vectors(VectorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_stale_next_id_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(
            &path,
            r#"{"url_to_ids": {"u": [4]}, "id_to_data": {"4": {"url": "u", "text": "t"}},
                "next_id": 4, "vectors": [[1.0]]}"#,
        )
        .unwrap();

        assert!(matches!(
            SnapshotCodec::new(path).load(1),
            Err(SnapshotError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_url_index_mismatch_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(
            &path,
            r#"{"url_to_ids": {"u": [0, 1]}, "id_to_data": {"0": {"url": "u", "text": "t"}},
                "next_id": 2, "vectors": [[1.0]]}"#,
        )
        .unwrap();

        assert!(matches!(
            SnapshotCodec::new(path).load(1),
            Err(SnapshotError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_save_cleans_up_on_error() {
        let tmp = tempfile::tempdir().unwrap();
        // a directory where the snapshot file should be makes the rename fail
        let path = tmp.path().join("index_data.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let result = SnapshotCodec::new(path.clone()).save(&sample_state());
        assert!(result.is_err());
        assert!(!sibling(&path, "tmp").exists());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let codec = SnapshotCodec::new(tmp.path().join("nested/deeper/index_data.json"));

        codec.save(&sample_state()).unwrap();
        assert!(codec.exists());
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_data.json");
        std::fs::write(&path, b"garbage").unwrap();

        let codec = SnapshotCodec::new(path.clone());
        let moved = codec.quarantine().unwrap();

        assert_eq!(moved, tmp.path().join("index_data.json.corrupt"));
        assert!(moved.exists());
        assert!(!path.exists());
    }
}
