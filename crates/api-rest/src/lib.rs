//! # API REST
//!
//! REST API for ctmark.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (multipart uploads, API key check, status mapping, CORS)
//!
//! Research rules live in `ctmark-core`; handlers only translate between HTTP and
//! [`ResearchService`].

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod error;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use ctmark_core::ResearchService;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use auth::{API_KEY_HEADER, USER_ID_HEADER};
pub use error::{ApiError, ErrorRes};

/// Largest accepted request body. Research uploads are whole CT series.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Application state shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ResearchService>,
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// `api_key` is resolved at startup; `None` makes every protected route answer 500.
    pub fn new(service: Arc<ResearchService>, api_key: Option<String>) -> Self {
        Self {
            service,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::create_research,
        handlers::get_capture,
        handlers::get_preview,
        handlers::get_markup,
        handlers::upload_markup,
        handlers::assign_marker,
    ),
    components(schemas(handlers::HealthRes, handlers::CreateResearchRes, ErrorRes))
)]
pub struct ApiDoc;

/// Builds the full REST application.
///
/// `/health` and the API docs are open; everything under `/api/v1` requires `x-api-key`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/research", post(handlers::create_research))
        .route("/research/:id/captures/:num", get(handlers::get_capture))
        .route("/research/:id/preview", get(handlers::get_preview))
        .route(
            "/research/:id/markup",
            get(handlers::get_markup).post(handlers::upload_markup),
        )
        .route("/research/:id/markers/:user", post(handlers::assign_marker))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
