pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{
        client_ip_middleware, create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter,
        TrustedProxies,
    },
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::middleware::{
    auth::DEVICE_FINGERPRINT_HEADER, auth_middleware, optional_auth_middleware,
    require_permission, PermissionGate,
};
use crate::models::{Action, Resource};
use crate::services::{AccessCondition, AuthService, CredentialStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub auth: AuthService,
    pub ip_rate_limiter: IpRateLimiter,
    pub trusted_proxies: TrustedProxies,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AuthError> {
        let auth = AuthService::new(&config, credentials)?;
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );
        let trusted_proxies = TrustedProxies::new(config.security.trusted_proxies.iter().copied());

        Ok(Self {
            config: Arc::new(config),
            auth,
            ip_rate_limiter,
            trusted_proxies,
            metrics,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh));

    let optional_routes = Router::new()
        .route("/auth/status", get(handlers::auth::status))
        .layer(from_fn_with_state(state.clone(), optional_auth_middleware));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/sessions", get(handlers::auth::sessions))
        .route(
            "/users/:user_id",
            get(handlers::users::get_user).route_layer(from_fn_with_state(
                PermissionGate::new(Resource::Users, Action::Read)
                    .with_condition(AccessCondition::AllowSelf, "user_id"),
                require_permission,
            )),
        )
        .route(
            "/users/:user_id/role",
            patch(handlers::users::change_role).route_layer(from_fn_with_state(
                PermissionGate::new(Resource::Users, Action::Manage),
                require_permission,
            )),
        )
        .route(
            "/users/:user_id/deactivate",
            post(handlers::users::deactivate).route_layer(from_fn_with_state(
                PermissionGate::new(Resource::Users, Action::Delete),
                require_permission,
            )),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .merge(public_routes)
        .merge(optional_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        // Must wrap everything that reads the client IP
        .layer(from_fn_with_state(
            state.trusted_proxies.clone(),
            client_ip_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(DEVICE_FINGERPRINT_HEADER),
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}
