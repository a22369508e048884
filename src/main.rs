use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod embeddings;
mod index;
mod lock;
mod web;

use config::Config;
use embeddings::OllamaEmbedder;
use index::{IndexManager, IndexOptions, LoadOutcome, SnapshotCodec};
use lock::FileLock;

/// Open the index described by `config`, holding the directory lock for as
/// long as the returned guard lives.
fn open_index(config: &Config) -> anyhow::Result<(IndexManager, FileLock)> {
    let index_path = config.index_path();
    let lock_dir = index_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let lock = FileLock::try_acquire(lock_dir)
        .with_context(|| format!("failed to lock {}", lock_dir.display()))?;

    let embedder = OllamaEmbedder::new(&config.embedding)?;
    log::info!(
        "Using embedding model {} at {}",
        config.embedding.model,
        embedder.endpoint()
    );

    let (manager, outcome) = IndexManager::open(
        SnapshotCodec::new(index_path),
        Arc::new(embedder),
        IndexOptions::from(config),
    )?;

    match outcome {
        LoadOutcome::Fresh => log::debug!("starting with an empty index"),
        LoadOutcome::Restored { chunks } => log::debug!("restored {chunks} chunks"),
        LoadOutcome::Recovered { quarantined } => log::warn!(
            "previous index was unreadable, kept at {}",
            quarantined.display()
        ),
    }

    Ok((manager, lock))
}

fn read_stdin_chunks() -> anyhow::Result<Vec<String>> {
    let mut chunks = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if !line.trim().is_empty() {
            chunks.push(line);
        }
    }
    Ok(chunks)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load()?;
    log::debug!("using base path {}", config.base_path().display());

    match args.command {
        cli::Command::Daemon {} => {
            let (manager, _lock) = open_index(&config)?;
            let index = Arc::new(RwLock::new(manager));

            web::start_daemon(
                index.clone(),
                config.listen_addr.clone(),
                config.index.default_k,
            )?;

            // the runtime is gone by now, so the blocking http client
            // inside the manager is dropped outside of it
            drop(index);
            Ok(())
        }

        cli::Command::Add { url, chunks } => {
            let chunks = if chunks.is_empty() {
                read_stdin_chunks()?
            } else {
                chunks
            };

            let (mut manager, _lock) = open_index(&config)?;
            let chunks_indexed = manager.add_document(&url, &chunks)?;

            print_json(&web::IndexResponse {
                success: true,
                url,
                chunks_indexed,
            })
        }

        cli::Command::Search { query, k } => {
            let (manager, _lock) = open_index(&config)?;
            let results = manager.search(&query, k.unwrap_or(config.index.default_k))?;

            print_json(&web::SearchResponse { results })
        }

        cli::Command::Delete { url } => {
            let (mut manager, _lock) = open_index(&config)?;
            let removed = manager.delete_url(&url)?;

            print_json(&web::DeleteResponse {
                success: true,
                url,
                removed,
            })
        }

        cli::Command::Clear { yes } => {
            let (mut manager, _lock) = open_index(&config)?;
            let stats = manager.stats();

            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Are you sure you want to remove {} chunks from {} urls?",
                    stats.chunks, stats.urls
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            manager.clear()?;
            print_json(&web::ClearResponse { success: true })
        }

        cli::Command::Stats {} => {
            let (manager, _lock) = open_index(&config)?;
            print_json(&manager.stats())
        }
    }
}
