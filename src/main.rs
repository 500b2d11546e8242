#![cfg_attr(debug_assertions, allow(dead_code, unused_imports))]

use std::{net::{Ipv4Addr, SocketAddr}, sync::Arc};

use axum::{
    extract::DefaultBodyLimit, http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderName, Method}, middleware, Router
};

use model::{store::SqliteStore, ModelController};
use routes::mw_auth;
use tokio::net::TcpListener;
use tools::{log::{log_info, LogServiceType}, recognition::OnnxFaceEncoder};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, cors::{Any, CorsLayer}, trace::TraceLayer};
pub use self::error::{RsResult, Error};

mod model;
mod routes;
mod error;
mod tools;
mod server;
mod domain;

/// Room for the multipart framing and text fields around an image of the maximum size.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;


#[tokio::main]
async fn main() -> RsResult<()> {
    tracing_subscriber::fmt().with_target(false).init();

    log_info(LogServiceType::Register, "Starting facegate server".to_string());
    log_info(LogServiceType::Register, "Initializing config".to_string());
    let config = server::initialize_config().await?;

    log_info(LogServiceType::Register, format!("Loading face models (dimension {})", config.embedding_dim));
    let encoder = OnnxFaceEncoder::load(&config.model_paths(), config.embedding_dim)?;
    let store = SqliteStore::new(&config.db_path(), config.db_pool_size).await?;

    let port = config.port;
    let mc = ModelController::new(store, config, Arc::new(encoder)).await?;
    if !mc.config.has_api_keys() {
        log_info(LogServiceType::Register, "No API key configured, every caller is admin".to_string());
    }

    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    log_info(LogServiceType::Register, format!("->> LISTENING on {:?}\n", listener.local_addr()));
    axum::serve(listener, app(mc)).await?;

    Ok(())
}


fn app(mc: ModelController) -> Router {
    let cors: CorsLayer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE, HeaderName::from_static("x-api-key")])
        .allow_origin(Any);
    let body_limit = mc.config.max_image_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .nest("/employees", routes::employees::routes(mc.clone()))
        .nest("/attendance", routes::attendance::routes(mc.clone()))
        .merge(routes::recognition::routes(mc.clone()))
        .layer(middleware::from_fn_with_state(mc.clone(), mw_auth::mw_api_key_resolver))
        .nest("/ping", routes::ping::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(cors)
        )
}
