use crate::index::{IndexError, IndexManager, IndexStats, SearchHit};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
pub struct SharedState {
    pub index: Arc<RwLock<IndexManager>>,
    pub default_k: usize,
}

pub fn router(shared_state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/index", post(index_document))
        .route("/search", post(search))
        .route("/delete", delete(delete_url))
        .route("/clear", post(clear))
        .route("/stats", get(stats))
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(index: Arc<RwLock<IndexManager>>, addr: String, default_k: usize) {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        // every mutation is saved before it returns, in-flight requests finish below
        log::warn!("shutting down, waiting for in-flight requests");
    }

    let app = router(Arc::new(SharedState { index, default_k }));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind {addr}: {err}");
            return;
        }
    };
    log::info!("listening on {addr}");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("server error: {err}");
    }
}

pub fn start_daemon(
    index: Arc<RwLock<IndexManager>>,
    addr: String,
    default_k: usize,
) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(index, addr, default_k).await });
    Ok(())
}

#[derive(Debug)]
struct HttpError(IndexError);

// Tell axum how to convert `IndexError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            IndexError::EmptyInput => axum::http::StatusCode::BAD_REQUEST,
            IndexError::Embedding(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::BAD_GATEWAY
            }
            IndexError::Vectors(_)
            | IndexError::Catalog(_)
            | IndexError::Snapshot(_)
            | IndexError::Misaligned { .. } => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<IndexError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Deserialize, Serialize)]
pub struct IndexRequest {
    pub url: String,
    /// Page title; accepted for compatibility, not indexed
    #[serde(default)]
    pub title: Option<String>,
    pub chunks: Vec<String>,
}

impl Debug for IndexRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IndexRequest {{ url: {:?}, title: {:?}, chunks: [{} chunks] }}",
            self.url,
            self.title,
            self.chunks.len()
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub success: bool,
    pub url: String,
    pub chunks_indexed: usize,
}

async fn index_document(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let index = state.index.clone();

    tokio::task::block_in_place(move || {
        let mut index = index.blocking_write();
        let chunks_indexed = index.add_document(&payload.url, &payload.chunks)?;

        Ok(IndexResponse {
            success: true,
            url: payload.url,
            chunks_indexed,
        }
        .into())
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let index = state.index.clone();
    let k = payload.k.unwrap_or(state.default_k);

    tokio::task::block_in_place(move || {
        let index = index.blocking_read();
        index
            .search(&payload.query, k)
            .map(|results| SearchResponse { results }.into())
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteRequest {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub url: String,
    pub removed: bool,
}

async fn delete_url(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let index = state.index.clone();

    tokio::task::block_in_place(move || {
        let mut index = index.blocking_write();
        let removed = index.delete_url(&payload.url)?;

        Ok(DeleteResponse {
            success: true,
            url: payload.url,
            removed,
        }
        .into())
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClearResponse {
    pub success: bool,
}

async fn clear(State(state): State<Arc<SharedState>>) -> Result<Json<ClearResponse>, HttpError> {
    let index = state.index.clone();

    tokio::task::block_in_place(move || {
        let mut index = index.blocking_write();
        index.clear()?;
        Ok(ClearResponse { success: true }.into())
    })
}

async fn stats(State(state): State<Arc<SharedState>>) -> Json<IndexStats> {
    let index = state.index.clone();

    tokio::task::block_in_place(move || index.blocking_read().stats().into())
}
