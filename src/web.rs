use crate::{
    app::{App, AppError, MatchRequest},
    catalog::CatalogSummary,
    outfit::{Recommendation, RecommendError},
    semantic::{CancelToken, MatchError, MatchReport},
    vision::VisionError,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/match", post(find_matches))
        .route("/api/recommend", post(recommend))
        .route("/api/catalog", get(catalog))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
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

async fn start_app(app: App, addr: &str) -> anyhow::Result<()> {
    let app = Arc::new(app);

    // load eagerly so the first request does not pay for it
    {
        let app = app.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(err) = app.catalog() {
                log::error!("catalog not loaded at startup: {err}");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

pub fn start_daemon(app: App, addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(app, addr).await })
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::BadRequest(_)
            | AppError::Recommend(RecommendError::Vision(
                VisionError::UnsupportedImage(_) | VisionError::Image(_),
            )) => StatusCode::BAD_REQUEST,
            AppError::Catalog(_) | AppError::Provider(_) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Recommend(RecommendError::Vision(_)) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::Match(MatchError::Cancelled) => {
                log::warn!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Cancels the in-flight match when the handler future is dropped, e.g.
/// because the client went away. Cancelling a finished match is a no-op.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, HttpError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| AppError::Other(anyhow::anyhow!("worker task failed: {err}")))?
        .map_err(Into::into)
}

async fn find_matches(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<MatchRequest>,
) -> Result<Json<MatchReport>, HttpError> {
    log::debug!("payload: {payload:?}");

    let cancel = CancelToken::new();
    let _guard = CancelOnDrop(cancel.clone());

    let app = state.app.clone();
    run_blocking(move || app.find_matches(&payload, cancel))
        .await
        .map(Json)
}

async fn catalog(State(state): State<Arc<SharedState>>) -> Result<Json<CatalogSummary>, HttpError> {
    let app = state.app.clone();
    run_blocking(move || app.summary()).await.map(Json)
}

#[derive(Deserialize)]
pub struct RecommendRequest {
    pub image_b64: String,
    #[serde(default)]
    pub top_n: Option<usize>,
    /// Skip the per-item compatibility check
    #[serde(default)]
    pub no_check: bool,
}

impl Debug for RecommendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RecommendRequest {{ image_b64: [REDACTED], top_n: {:?}, no_check: {:?} }}",
            self.top_n, self.no_check
        )
    }
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RecommendRequest>,
) -> Result<Json<Recommendation>, HttpError> {
    log::debug!("payload: {payload:?}");

    let image = STANDARD
        .decode(payload.image_b64.trim())
        .map_err(|err| AppError::BadRequest(format!("image_b64: {err}")))?;

    let app = state.app.clone();
    run_blocking(move || app.recommend(image, payload.top_n, !payload.no_check))
        .await
        .map(Json)
}
