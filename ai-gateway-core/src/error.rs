//! Error taxonomy for the provider proxy.
//!
//! Two layers, mirroring the rest of the crate's error handling: [`ProxyError`]
//! is what callers of [`crate::proxy::ProviderProxy`] see, [`ProviderError`] is
//! what the engine and credential resolver produce while talking to a single
//! upstream provider. `ProxyError::Provider` wraps the latter.

use thiserror::Error;

/// Stable error codes surfaced to callers, matching the proxy's error
/// taxonomy. Kept separate from the `Display` message so callers can branch
/// on `code` without parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorKind {
    Validation,
    ProviderNotFound,
    NoProvidersAvailable,
    CircuitBreakerOpen,
    ApiKeyMissing,
    ProviderInvocationFailed,
    Timeout,
    RateLimited,
    QuotaExceeded,
    NetworkError,
    ProviderUnavailable,
}

impl ProxyErrorKind {
    /// Whether the candidate loop should keep trying the next provider
    /// after an error of this kind. `quota_exceeded` is deliberately still
    /// retryable at the proxy level even though the provider itself will
    /// not recover within this request (spec: "still try fallbacks").
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ProxyErrorKind::Timeout | ProxyErrorKind::RateLimited | ProxyErrorKind::NetworkError
        )
    }
}

/// Top-level error type returned by [`crate::proxy::ProviderProxy::invoke`]
/// and friends.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("no providers available for operation")]
    NoProvidersAvailable,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("all candidate providers failed: {0}")]
    ProviderUnavailable(#[source] Box<ProviderError>),

    #[error("repository error: {0}")]
    Repository(#[from] crate::repository::RepositoryError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("template error: {0}")]
    Template(String),
}

impl ProxyError {
    pub fn kind(&self) -> ProxyErrorKind {
        match self {
            ProxyError::Validation(_) | ProxyError::Template(_) => ProxyErrorKind::Validation,
            ProxyError::ProviderNotFound(_) => ProxyErrorKind::ProviderNotFound,
            ProxyError::NoProvidersAvailable => ProxyErrorKind::NoProvidersAvailable,
            ProxyError::Provider(e) => e.kind(),
            ProxyError::ProviderUnavailable(_) => ProxyErrorKind::ProviderUnavailable,
            ProxyError::Repository(_) => ProxyErrorKind::Validation,
            ProxyError::Cache(_) => ProxyErrorKind::Validation,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}

/// Errors raised while invoking a single provider, before the proxy's
/// candidate loop has decided whether to fall back.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {status_text} - {body}")]
    Http4xxOr5xx {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("API key missing: {0}")]
    ApiKeyMissing(String),

    #[error("provider invocation failed: {0}")]
    InvocationFailed(String),

    #[error("timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("response format error: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProxyErrorKind {
        match self {
            ProviderError::Http(_) | ProviderError::NetworkError(_) => {
                ProxyErrorKind::NetworkError
            }
            ProviderError::Http4xxOr5xx { status, .. } if *status == 429 => {
                ProxyErrorKind::RateLimited
            }
            ProviderError::Http4xxOr5xx { .. } => ProxyErrorKind::ProviderInvocationFailed,
            ProviderError::ApiKeyMissing(_) => ProxyErrorKind::ApiKeyMissing,
            ProviderError::InvocationFailed(_) => ProxyErrorKind::ProviderInvocationFailed,
            ProviderError::Timeout => ProxyErrorKind::Timeout,
            ProviderError::RateLimited => ProxyErrorKind::RateLimited,
            ProviderError::QuotaExceeded => ProxyErrorKind::QuotaExceeded,
            ProviderError::Serialization(_) | ProviderError::InvalidResponse(_) => {
                ProxyErrorKind::ProviderInvocationFailed
            }
        }
    }

    /// HTTP 400/401/403 are caller faults and must not trip the breaker;
    /// 429 does not trip it either (§4.1.2).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            ProviderError::Http4xxOr5xx { status, .. }
                if matches!(status, 400 | 401 | 403 | 429)
        )
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}
