//! HTTP Server.
//!
//! Exposes exactly the two routes named in §6: `POST /v1/invoke` as a thin
//! adapter over `ProviderProxy::invoke`, and `GET /health` returning
//! `ProviderProxy::get_proxy_health`. No auth, rate limiting, or dashboard
//! routes live here; that surface is explicitly out of scope.

use ai_gateway_core::models::{ProviderRequest, ProviderResponse};
use ai_gateway_core::proxy::ProviderProxy;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProviderProxy>,
}

pub fn create_server(proxy: Arc<ProviderProxy>) -> Router {
    let state = AppState { proxy };

    Router::new()
        .route("/v1/invoke", post(invoke))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn invoke(
    State(state): State<AppState>,
    Json(request): Json<ProviderRequest>,
) -> impl IntoResponse {
    match state.proxy.invoke(request).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => {
            let kind = err.kind();
            let status = status_for_kind(kind);
            let response = ProviderResponse {
                provider_id: String::new(),
                provider_name: String::new(),
                model: None,
                success: false,
                result: None,
                error: Some(ai_gateway_core::models::ProviderResponseError {
                    code: format!("{kind:?}"),
                    message: err.to_string(),
                    error_type: "proxy_error".to_string(),
                    retryable: err.retryable(),
                }),
                metadata: Default::default(),
            };
            (status, Json(response))
        }
    }
}

fn status_for_kind(kind: ai_gateway_core::error::ProxyErrorKind) -> StatusCode {
    use ai_gateway_core::error::ProxyErrorKind::*;
    match kind {
        Validation => StatusCode::BAD_REQUEST,
        ProviderNotFound => StatusCode::NOT_FOUND,
        NoProvidersAvailable | CircuitBreakerOpen | ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ApiKeyMissing => StatusCode::UNAUTHORIZED,
        ProviderInvocationFailed => StatusCode::BAD_GATEWAY,
        Timeout => StatusCode::GATEWAY_TIMEOUT,
        RateLimited => StatusCode::TOO_MANY_REQUESTS,
        QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
        NetworkError => StatusCode::BAD_GATEWAY,
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.proxy.get_proxy_health().await;
    (StatusCode::OK, Json(health))
}
