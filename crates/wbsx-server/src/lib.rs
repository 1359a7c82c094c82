//! # wbsx-server
//!
//! HTTP front end for the WBS template filler.
//!
//! - `GET /` reports that the service is up
//! - `POST /export` takes `{"wbsData": [...]}` (or a bare list) and answers
//!   with the filled macro-enabled workbook
//!
//! All behavior is fixed at startup through [`ServerConfig`].
//!
//! ```rust,ignore
//! let state = AppState::new(ServerConfig::default())?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, wbsx_server::router(state)).await?;
//! ```

pub mod config;
pub mod error;
pub mod export;

pub use config::{ConfigError, ServerArgs, ServerConfig};
pub use error::ApiError;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use wbsx_core::FillError;
use wbsx_writer::{build_writer, SharedWriter};

/// Shared, read-only state of every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub writer: SharedWriter,
    /// Single permit held by fills through an exclusive writer
    exclusive: Arc<Semaphore>,
}

impl AppState {
    /// Build the writer named by the configuration
    pub fn new(config: ServerConfig) -> Result<Self, FillError> {
        let writer = build_writer(&config.writer_config())?;
        Ok(Self::with_writer(config, writer))
    }

    pub fn with_writer(config: ServerConfig, writer: SharedWriter) -> Self {
        Self {
            config: Arc::new(config),
            writer,
            exclusive: Arc::new(Semaphore::new(1)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(export::root))
        .route("/export", post(export::export))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy for the configured origins; `*` allows any origin
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().expose_headers([header::CONTENT_DISPOSITION]);

    if origins.iter().any(|o| o == "*") {
        return layer
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
