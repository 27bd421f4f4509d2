use ctmark_api_rest::{router, AppState};
use ctmark_core::config::parse_override;
use ctmark_core::constants::{
    DEFAULT_RESEARCHES_DIR, DEFAULT_REST_ADDR, PATH_CACHE_CAPACITY_ENV, RESEARCHES_DIR_ENV,
    REST_ADDR_ENV, UPLOAD_CHUNK_SIZE_ENV,
};
use ctmark_core::{CoreConfig, InMemoryResearchAccess, ResearchService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the ctmark server
///
/// Resolves configuration once, makes sure the research root exists and serves the REST API.
///
/// # Environment Variables
/// - `CTMARK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `RESEARCHES_DIR`: research storage root (default: "researches")
/// - `CTMARK_PATH_CACHE_CAPACITY`: memoised research paths (default: 256)
/// - `CTMARK_UPLOAD_CHUNK_SIZE`: archive spooling chunk in bytes (default: 5 MiB)
/// - `API_KEY`: key expected in the `x-api-key` header
///
/// # Errors
/// Returns an error if configuration is invalid, the research root cannot be created, the
/// address cannot be bound or the server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ctmark=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var(REST_ADDR_ENV).unwrap_or_else(|_| DEFAULT_REST_ADDR.into());
    let researches_dir = std::env::var(RESEARCHES_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_RESEARCHES_DIR));
    let defaults = CoreConfig::default();
    let path_cache_capacity = parse_override(
        PATH_CACHE_CAPACITY_ENV,
        std::env::var(PATH_CACHE_CAPACITY_ENV).ok().as_deref(),
        defaults.path_cache_capacity(),
    )?;
    let upload_chunk_size = parse_override(
        UPLOAD_CHUNK_SIZE_ENV,
        std::env::var(UPLOAD_CHUNK_SIZE_ENV).ok().as_deref(),
        defaults.upload_chunk_size(),
    )?;

    let cfg = CoreConfig::new(researches_dir, path_cache_capacity, upload_chunk_size)?;
    tokio::fs::create_dir_all(cfg.researches_dir()).await?;

    let api_key = std::env::var("API_KEY").ok();
    if api_key.is_none() {
        tracing::warn!("API_KEY not set; protected routes will refuse every request");
    }

    let service = ResearchService::new(&cfg, Arc::new(InMemoryResearchAccess::new()));
    let app = router(AppState::new(Arc::new(service), api_key));

    tracing::info!(
        "++ Starting ctmark REST on {} (researches in {})",
        rest_addr,
        cfg.researches_dir().display()
    );

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
