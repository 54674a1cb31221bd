//! HTTP surface: routes, middleware and server startup.

pub mod error;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod state;

pub use error::ApiError;
pub use openapi::openapi;
pub use state::AppState;

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    accounts::MemoryAccountStore,
    auth::{PasswordHasher, SessionCodec},
    config::Config,
    ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore},
    sso::SsoVerifier,
};
use handlers::health;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Documented routes plus `/openapi.json`, wrapped in the middleware stack.
///
/// # Errors
/// Returns an error if `frontend_origin` is not an absolute URL with a host.
pub fn app(state: Arc<AppState>, frontend_origin: Option<&str>) -> Result<Router> {
    let cors = cors(frontend_origin)?;

    let (router, _openapi) = router().split_for_parts();
    Ok(router
        .route("/health", options(health::health))
        .route("/openapi.json", get(openapi_json))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        ))
}

/// Wire the configured components and serve until ctrl-c.
///
/// # Errors
/// Returns an error if a component cannot be built or the server fails to start.
pub async fn new(config: Config) -> Result<()> {
    let apple = config
        .apple_verifier()
        .context("Failed to load Sign in with Apple settings")?;
    if apple.is_none() {
        warn!("Sign in with Apple is not configured, federated routes will fail");
    }

    let counters: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCounterStore::connect(url)
                .await
                .context("Failed to connect to the rate limit store")?,
        ),
        None => {
            warn!("No redis url configured, rate limit counters are local to this process");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let state = Arc::new(AppState {
        codec: SessionCodec::new(&config.token_settings()),
        hasher: PasswordHasher::new(),
        limiter: RateLimiter::new(counters, config.rate_limit_window()),
        sso: SsoVerifier::new(apple),
        accounts: Arc::new(MemoryAccountStore::new()),
        system_key: config.system_key.clone(),
        trust_proxy: config.trust_proxy,
    });

    let app = app(state, config.frontend_origin.as_deref())?;

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors(frontend_origin: Option<&str>) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ]);

    Ok(match frontend_origin {
        Some(url) => cors
            .allow_origin(AllowOrigin::exact(origin_header(url)?))
            .allow_credentials(true),
        None => cors.allow_origin(AllowOrigin::any()),
    })
}

fn origin_header(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
