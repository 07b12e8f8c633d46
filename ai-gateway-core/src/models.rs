//! Data model shared by every component: persisted provider configuration,
//! templates, cache entries, health/circuit-breaker state, metrics, and the
//! external request/response envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The operation a caller asks the proxy to perform. Mapped to a
/// [`ProviderType`] by [`Operation::provider_type`] during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    TextGeneration,
    TextAnalysis,
    MusicGeneration,
    ImageGeneration,
    AudioTranscription,
    ImageAnalysis,
}

impl Operation {
    pub fn provider_type(self) -> ProviderType {
        match self {
            Operation::TextGeneration | Operation::TextAnalysis | Operation::ImageAnalysis => {
                ProviderType::Llm
            }
            Operation::MusicGeneration => ProviderType::Music,
            Operation::ImageGeneration => ProviderType::Image,
            Operation::AudioTranscription => ProviderType::Audio,
        }
    }
}

/// `providerType` discriminant, shared by the persisted configuration row
/// and the tagged [`ProviderTypeConfig`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Llm,
    Music,
    Image,
    Video,
    Audio,
    Text,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::Llm => "llm",
            ProviderType::Music => "music",
            ProviderType::Image => "image",
            ProviderType::Video => "video",
            ProviderType::Audio => "audio",
            ProviderType::Text => "text",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "llm" => Some(ProviderType::Llm),
            "music" => Some(ProviderType::Music),
            "image" => Some(ProviderType::Image),
            "video" => Some(ProviderType::Video),
            "audio" => Some(ProviderType::Audio),
            "text" => Some(ProviderType::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Error,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Error => "error",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(HealthStatus::Healthy),
            "degraded" => Some(HealthStatus::Degraded),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            "error" => Some(HealthStatus::Error),
            "unknown" => Some(HealthStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

/// `auth` sub-object of a provider's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub env_var_name: Option<String>,
    #[serde(default)]
    pub required_secrets: Vec<String>,
}

fn default_header_name() -> String {
    "Authorization".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckMethod {
    Get,
    Head,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEndpointConfig {
    pub url: String,
    #[serde(default = "default_health_method")]
    pub method: HealthCheckMethod,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub is_free: bool,
}

fn default_health_method() -> HealthCheckMethod {
    HealthCheckMethod::Get
}

/// Fields shared by every `providerType` variant of the `configuration`
/// payload (spec §3's "Provider Configuration.configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    pub endpoint: String,
    pub request_template: serde_json::Value,
    pub response_mapping: ResponseMapping,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "crate::common::duration_serde::option")]
    pub timeout: Option<std::time::Duration>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub health_endpoint: Option<HealthEndpointConfig>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Post
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMapping {
    pub content: String,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// The discriminated `configuration` payload: a tagged variant per
/// `providerType` carrying the shared endpoint shape. Replaces a
/// duck-typed "parse whatever JSON is there" configuration blob with a
/// type the engine and credentials resolver can match on directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "providerType", rename_all = "snake_case")]
pub enum ProviderTypeConfig {
    Llm(ProviderEndpointConfig),
    Image(ProviderEndpointConfig),
    Music(ProviderEndpointConfig),
    Video(ProviderEndpointConfig),
    Audio(ProviderEndpointConfig),
    Text(ProviderEndpointConfig),
}

impl ProviderTypeConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderTypeConfig::Llm(_) => ProviderType::Llm,
            ProviderTypeConfig::Image(_) => ProviderType::Image,
            ProviderTypeConfig::Music(_) => ProviderType::Music,
            ProviderTypeConfig::Video(_) => ProviderType::Video,
            ProviderTypeConfig::Audio(_) => ProviderType::Audio,
            ProviderTypeConfig::Text(_) => ProviderType::Text,
        }
    }

    pub fn endpoint_config(&self) -> &ProviderEndpointConfig {
        match self {
            ProviderTypeConfig::Llm(c)
            | ProviderTypeConfig::Image(c)
            | ProviderTypeConfig::Music(c)
            | ProviderTypeConfig::Video(c)
            | ProviderTypeConfig::Audio(c)
            | ProviderTypeConfig::Text(c) => c,
        }
    }

    pub fn is_llm(&self) -> bool {
        matches!(self, ProviderTypeConfig::Llm(_))
    }

    pub fn is_music(&self) -> bool {
        matches!(self, ProviderTypeConfig::Music(_))
    }
}

/// The persisted provider configuration row (spec §3, `cfg_provider_configs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigRecord {
    pub id: i64,
    pub provider_id: String,
    pub provider_name: String,
    pub configuration: ProviderTypeConfig,
    pub is_active: bool,
    pub is_primary: bool,
    pub priority: i32,
    /// Stored as a decimal string per spec; never parsed against `credit_cost`.
    pub cost_per_unit: String,
    pub credit_cost: f64,
    pub health_status: HealthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl ProviderConfigRecord {
    pub fn provider_type(&self) -> ProviderType {
        self.configuration.provider_type()
    }
}

/// A stored prompt template consumed by the template execution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    pub variables: Vec<TemplateVariable>,
    pub is_active: bool,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

fn default_var_type() -> String {
    "string".to_string()
}

/// A generic cached value with creation/expiry timestamps, used by both
/// cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub status: CircuitBreakerStatus,
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub next_retry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// In-memory per-provider health record (spec §3 `ProviderHealth`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub average_latency_ms: f64,
    pub success_rate: f64,
    pub request_count: u64,
    pub success_count: u64,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub rate_limit_info: Option<RateLimitInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// `LoadBalancingStrategy` from the configuration surface. Only `Priority`
/// is wired into selection (see `proxy::ProviderProxy::configure_load_balancing`);
/// the rest deserialize successfully but are rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    Priority,
    RoundRobin,
    Weighted,
    LeastConnections,
    HealthBased,
    CostOptimized,
}

/// Per-request overrides the caller may supply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRequestOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default)]
    pub image_detail: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The upstream entry point contract (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    #[serde(default)]
    pub provider_id: Option<String>,
    pub operation: Operation,
    pub payload: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub options: ProviderRequestOptions,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponseError {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponseMetadata {
    pub processing_time_ms: u64,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub rate_limit_remaining: Option<i64>,
    #[serde(default)]
    pub rate_limit_reset_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_format: Option<String>,
    #[serde(default)]
    pub is_base64: Option<bool>,
    #[serde(default)]
    pub is_early_playback: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_id: String,
    pub provider_name: String,
    #[serde(default)]
    pub model: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ProviderResponseError>,
    pub metadata: ProviderResponseMetadata,
}
