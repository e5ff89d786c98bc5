//! HTTP API server.
//!
//! Assembles the module registry into one axum router:
//!
//! - system endpoints (`/health`, `/version`, `/api/info`, `/metrics`)
//!   are public;
//! - module routers mount at their declared [`MountPoint`], with the
//!   protected group nested under `/api/v2` behind the tenant auth
//!   middleware.
//!
//! ## Endpoints
//!
//! ### Bans (`/api/v2/bans`)
//! - `GET /bans` - List active bans (paginated, optional `siteId` filter)
//! - `POST /bans` - Ban an address or CIDR block
//! - `GET /bans/check/{ip}` - Membership check
//! - `GET /bans/stats` - Aggregate counts
//! - `GET /bans/{id}` / `DELETE /bans/{id}` - Single ban by id
//! - `DELETE /bans/ip/{ip}` - Unban by address
//! - `POST /bans/bulk` / `DELETE /bans/bulk` - Batch operations
//!
//! ### Sites (`/api/v2/sites`), Settings (`/api/v2/settings`),
//! ### Security events (`/api/v2/security/events`)
//! See the per-module handler files.

pub mod auth;
pub mod types;

use crate::bans::{BanCache, BanCoordinator, BanStore, SetCache};
use crate::config::Config;
use crate::db::Db;
use crate::error::Error;
use crate::events::EventStore;
use crate::metrics;
use crate::module::{registry, MountPoint};
use crate::settings::SettingsStore;
use crate::sites::SiteStore;
use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use types::{ErrorResponse, HealthResponse, InfoResponse, ModuleInfo, VersionResponse};

// =============================================================================
// App State
// =============================================================================

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub bans: BanCoordinator,
    pub sites: SiteStore,
    pub settings: SettingsStore,
    pub events: EventStore,
    /// Kept alongside the coordinator for the health probe.
    cache: Option<SetCache>,
}

impl AppState {
    /// Wires all services around one database and an optional cache.
    pub fn new(db: Db, cache: Option<SetCache>) -> Self {
        let ban_cache: Option<Arc<dyn BanCache>> = cache
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn BanCache>);
        Self {
            bans: BanCoordinator::new(BanStore::new(db.clone()), ban_cache),
            sites: SiteStore::new(db.clone()),
            settings: SettingsStore::new(db.clone()),
            events: EventStore::new(db.clone()),
            db,
            cache,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Opens the stores and runs the HTTP server until ctrl-c.
///
/// A cache that fails to open is logged and dropped: the server comes up
/// without it and every membership check takes the authoritative path.
pub async fn serve(config: Config) -> Result<()> {
    let _handle = metrics::init_metrics();

    let db = Db::open(&config.database.path).context("failed to open database")?;

    let cache = if config.cache.enabled {
        match SetCache::open(&config.cache.path) {
            Ok(cache) => Some(cache),
            Err(error) => {
                tracing::warn!(%error, "ban cache unavailable, continuing without it");
                None
            }
        }
    } else {
        tracing::info!("ban cache disabled by configuration");
        None
    };

    let state = AppState::new(db, cache);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}

/// Builds the full router from the module registry.
pub fn router(state: AppState) -> Router {
    let mut public = Router::new();
    let mut protected = Router::new();

    for module in registry() {
        tracing::info!(
            module = module.name(),
            version = module.version(),
            "module registered"
        );
        match module.mount_point() {
            MountPoint::Public => public = public.merge(module.router()),
            MountPoint::Protected => protected = protected.merge(module.router()),
        }
    }

    let protected = protected.layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_api_key,
    ));

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/api/info", get(info))
        .route("/metrics", get(metrics_endpoint))
        .merge(public)
        .nest("/api/v2", protected)
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

// =============================================================================
// System Endpoints
// =============================================================================

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    let database = match state.db.ping() {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    let cache = match &state.cache {
        Some(cache) => match cache.probe() {
            Ok(()) => "connected",
            Err(_) => "disconnected",
        },
        None => "disabled",
    };
    Json(HealthResponse {
        status: overall_status(database, cache).to_string(),
        database: database.to_string(),
        cache: cache.to_string(),
    })
}

/// The database is load-bearing; the cache is best-effort, so only a
/// present-but-broken cache degrades the status ("disabled" is fine).
fn overall_status(database: &str, cache: &str) -> &'static str {
    if database == "connected" && cache != "disconnected" {
        "healthy"
    } else {
        "degraded"
    }
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn info() -> Json<InfoResponse> {
    let modules = registry()
        .iter()
        .map(|m| ModuleInfo {
            name: m.name().to_string(),
            version: m.version().to_string(),
        })
        .collect();
    Json(InfoResponse {
        name: "wafden".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        modules,
    })
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::render_metrics(),
    )
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}

// =============================================================================
// Error Handling
// =============================================================================

/// Application error type for HTTP responses.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidAddress(_) => Self::BadRequest(err.to_string()),
            Error::NotFound(_) => Self::NotFound(err.to_string()),
            Error::Conflict(_) => Self::Conflict(err.to_string()),
            // Internal detail (driver messages, lock state) stays out of
            // responses; kind survives, message is generic.
            Error::Database(_) | Error::Cache(_) | Error::Internal(_) => {
                tracing::error!(error = %err, "request failed");
                Self::Internal("internal error".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Db::open_in_memory().unwrap(), None)
    }

    #[tokio::test]
    async fn health_reports_disabled_cache() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.database, "connected");
        assert_eq!(health.cache, "disabled");
    }

    #[test]
    fn status_follows_component_probes() {
        assert_eq!(overall_status("connected", "disabled"), "healthy");
        assert_eq!(overall_status("connected", "connected"), "healthy");
        assert_eq!(overall_status("connected", "disconnected"), "degraded");
        assert_eq!(overall_status("disconnected", "connected"), "degraded");
        assert_eq!(overall_status("disconnected", "disabled"), "degraded");
    }

    #[tokio::test]
    async fn version_endpoint_reports_crate_version() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let version: VersionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(version.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn info_lists_registered_modules() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let info: InfoResponse = serde_json::from_slice(&body).unwrap();
        assert!(info.modules.iter().any(|m| m.name == "bans"));
    }

    #[tokio::test]
    async fn protected_routes_require_api_key() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v2/bans")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_api_key_is_unauthorized() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v2/bans")
                    .header(auth::API_KEY_HEADER, "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
