use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::index::DEFAULT_MIN_CHUNK_CHARS;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11434";
/// Default embedding model (mxbai-embed-large produces 1024-dim vectors)
const DEFAULT_EMBEDDING_MODEL: &str = "mxbai-embed-large";
const DEFAULT_DIMENSIONS: usize = 1024;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EMBEDDING_RETRIES: u32 = 2;

const DEFAULT_INDEX_PATH: &str = "index_data.json";
const DEFAULT_SEARCH_K: usize = 5;

/// Configuration for the embedding service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the Ollama-compatible service
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    /// Model name sent with every request
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Length of every vector the model returns
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a timeout, connection error or 5xx response
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            max_retries: DEFAULT_EMBEDDING_RETRIES,
        }
    }
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_embedding_retries() -> u32 {
    DEFAULT_EMBEDDING_RETRIES
}

/// Configuration for the vector index and its snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Snapshot file; relative paths resolve against the base directory
    #[serde(default = "default_index_path")]
    pub path: String,

    /// Chunks shorter than this (trimmed, in characters) are not indexed
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,

    /// Number of results returned when a search does not ask for a count
    #[serde(default = "default_search_k")]
    pub default_k: usize,

    /// Refuse to start on a corrupt snapshot instead of starting empty
    #[serde(default)]
    pub strict_load: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_INDEX_PATH.to_string(),
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
            default_k: DEFAULT_SEARCH_K,
            strict_load: false,
        }
    }
}

fn default_index_path() -> String {
    DEFAULT_INDEX_PATH.to_string()
}

fn default_min_chunk_chars() -> usize {
    DEFAULT_MIN_CHUNK_CHARS
}

fn default_search_k() -> usize {
    DEFAULT_SEARCH_K
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.base_url.trim().is_empty() {
            bail!("embedding.base_url must not be empty");
        }
        if emb.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if emb.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }
        if emb.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }

        let idx = &self.index;
        if idx.path.trim().is_empty() {
            bail!("index.path must not be empty");
        }
        if idx.default_k == 0 {
            bail!("index.default_k must be greater than 0");
        }

        Ok(())
    }

    /// Resolve the base directory from `PAGERAG_BASE_PATH` or the home directory
    /// and load the config found there.
    pub fn load() -> anyhow::Result<Self> {
        let base_path = match std::env::var("PAGERAG_BASE_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => homedir::my_home()
                .ok()
                .flatten()
                .context("could not determine home directory")?
                .join(".local/share/pagerag"),
        };

        let mut config = Self::load_with(&base_path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load `config.yaml` from `base_path`, writing defaults on first run.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&config_path, defaults)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", config_path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        let config_path = self.base_path.join(CONFIG_FILE);
        std::fs::write(&config_path, config_str)
            .with_context(|| format!("failed to write {}", config_path.display()))
    }

    /// Environment variables used by existing deployments take
    /// precedence over the file. They are never written back.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(path) = std::env::var("INDEX_PATH") {
            self.index.path = path;
        }
        if let Ok(addr) = std::env::var("PAGERAG_ADDR") {
            self.listen_addr = addr;
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute location of the snapshot file.
    pub fn index_path(&self) -> PathBuf {
        let path = Path::new(&self.index.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
