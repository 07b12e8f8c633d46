//! Provider Proxy — the single entry point for provider invocation.
//!
//! Ties together selection, the circuit breaker, the credentials resolver,
//! the HTTP provider engine, the music poll workflow, and the metrics
//! collector into `invoke(request) -> response` plus the surrounding
//! health/admin surface (§4.1).

use crate::cache::TtlLruCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::credentials::CredentialsResolver;
use crate::engine::{self, SubstitutionContext, VisionParams};
use crate::error::{ProviderError, ProxyError};
use crate::metrics::{InvocationEvent, MetricsCollector};
use crate::models::{
    CircuitBreakerStatus, HealthStatus, LoadBalancingStrategy, Operation, ProviderConfigRecord,
    ProviderHealth, ProviderRequest, ProviderResponse,
    ProviderResponseMetadata, ProviderType, RateLimitInfo,
};
use crate::music;
use crate::repository::{ProviderConfigFilter, ProviderConfigRepository};
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);
const CONFIG_CACHE_MAX: usize = 500;
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Providers known to charge for live test calls; the health loop marks
/// these healthy by default instead of issuing a probe (§4.1.1).
fn is_expensive_probe_provider(provider_id: &str) -> bool {
    matches!(provider_id, "musicapi" | "suno" | "udio")
}

#[derive(Debug, Default)]
struct HealthCounters {
    request_count: AtomicU64,
    success_count: AtomicU64,
    latency_sum_ms: AtomicU64,
}

struct ProviderState {
    breaker: CircuitBreaker,
    counters: HealthCounters,
    status: std::sync::RwLock<HealthStatus>,
    last_check: std::sync::RwLock<chrono::DateTime<Utc>>,
    rate_limit: std::sync::RwLock<Option<RateLimitInfo>>,
}

impl ProviderState {
    fn new(provider_id: &str) -> Self {
        Self {
            breaker: CircuitBreaker::new(provider_id.to_string(), CircuitBreakerConfig::default()),
            counters: HealthCounters::default(),
            status: std::sync::RwLock::new(HealthStatus::Unknown),
            last_check: std::sync::RwLock::new(Utc::now()),
            rate_limit: std::sync::RwLock::new(None),
        }
    }
}

pub struct ProviderProxy {
    repository: Arc<dyn ProviderConfigRepository>,
    credentials: CredentialsResolver,
    metrics: Arc<MetricsCollector>,
    http: Client,
    states: DashMap<String, Arc<ProviderState>>,
    config_cache: TtlLruCache<ProviderConfigRecord>,
    load_balancing: std::sync::RwLock<LoadBalancingStrategy>,
}

pub struct SelectionResult {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl ProviderProxy {
    pub fn new(repository: Arc<dyn ProviderConfigRepository>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            repository,
            credentials: CredentialsResolver::new(),
            metrics,
            http: Client::new(),
            states: DashMap::new(),
            config_cache: TtlLruCache::new(CONFIG_CACHE_MAX, CONFIG_CACHE_TTL),
            load_balancing: std::sync::RwLock::new(LoadBalancingStrategy::Priority),
        }
    }

    fn state(&self, provider_id: &str) -> Arc<ProviderState> {
        self.states
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(ProviderState::new(provider_id)))
            .clone()
    }

    /// `configureLoadBalancing`: only `priority` is wired into selection
    /// (§9 Open Question); anything else is rejected rather than silently
    /// ignored.
    pub fn configure_load_balancing(&self, strategy: LoadBalancingStrategy) -> Result<(), ProxyError> {
        if strategy != LoadBalancingStrategy::Priority {
            return Err(ProxyError::Validation(format!(
                "load balancing strategy {strategy:?} is not implemented; only Priority is wired"
            )));
        }
        *self.load_balancing.write().unwrap() = strategy;
        Ok(())
    }

    async fn load_config_cached(&self, provider_id: &str) -> Option<ProviderConfigRecord> {
        if let Some(cached) = self.config_cache.get(provider_id) {
            if cached.is_active {
                return Some(cached);
            }
        }
        let all = self
            .repository
            .find_all(ProviderConfigFilter::default())
            .await
            .ok()?;
        let record = all.into_iter().find(|r| r.provider_id == provider_id && r.is_active)?;
        self.config_cache.set(provider_id.to_string(), record.clone());
        Some(record)
    }

    /// Priority-based selection: active providers of the operation's
    /// mapped type, breaker not open, sorted ascending by priority.
    /// Primary = first, fallbacks = next three.
    pub async fn select_provider(&self, operation: Operation) -> Result<SelectionResult, ProxyError> {
        let provider_type = operation.provider_type();
        let active = self
            .repository
            .find_active_providers(Some(provider_type))
            .await?;

        let mut candidates = Vec::new();
        for record in active {
            let state = self.state(&record.provider_id);
            if state.breaker.status().await == CircuitBreakerStatus::Open {
                continue;
            }
            candidates.push(record);
        }
        candidates.sort_by_key(|r| r.priority);

        if candidates.is_empty() {
            return Err(ProxyError::NoProvidersAvailable);
        }

        let primary = candidates[0].provider_id.clone();
        let fallbacks = candidates
            .iter()
            .skip(1)
            .take(3)
            .map(|r| r.provider_id.clone())
            .collect();

        Ok(SelectionResult { primary, fallbacks })
    }

    /// Build the ordered, de-duplicated candidate list for one `invoke`
    /// call: explicit `providerId` leads, else selection's primary +
    /// fallbacks, then any caller-supplied fallback providers.
    async fn candidate_order(&self, request: &ProviderRequest) -> Result<Vec<String>, ProxyError> {
        let mut order = Vec::new();
        if let Some(id) = &request.provider_id {
            order.push(id.clone());
        } else {
            let selection = self.select_provider(request.operation).await?;
            order.push(selection.primary);
            order.extend(selection.fallbacks);
        }
        order.extend(request.options.fallback_providers.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        Ok(order.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }

    async fn is_available(&self, provider_id: &str) -> bool {
        let Some(config) = self.load_config_cached(provider_id).await else {
            return false;
        };
        if !config.is_active {
            return false;
        }
        self.state(provider_id).breaker.is_available().await
    }

    /// Credentials echoed back in a provider's error body (e.g. an auth
    /// gateway that quotes the offending header) must never reach the
    /// caller or the logs unmasked (§7).
    fn classify_http_status(status: u16, body: String, status_text: String) -> ProviderError {
        ProviderError::Http4xxOr5xx {
            status,
            status_text,
            body: crate::common::masking::sanitize_body_text(&body),
        }
    }

    /// Invoke a single candidate end to end: breaker check already done by
    /// the caller; this loads config, resolves credentials, renders and
    /// executes the HTTP request (or the music poll workflow), and
    /// extracts a normalized result.
    async fn invoke_candidate(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let start = std::time::Instant::now();
        let config = self
            .load_config_cached(provider_id)
            .await
            .ok_or_else(|| ProviderError::InvocationFailed(format!("provider not found: {provider_id}")))?;

        let endpoint_config = config.configuration.endpoint_config();
        let auth_config = endpoint_config.auth.as_ref();
        let credentials = self.credentials.resolve(provider_id, auth_config);
        if !credentials.is_valid {
            return Err(ProviderError::ApiKeyMissing(credentials.missing_credentials.join(", ")));
        }

        let prompt = request
            .payload
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let modality = request.operation.provider_type().as_str();
        let ctx = SubstitutionContext::build(prompt, modality, &request.options.extra);

        let artwork_url = request.options.extra.get("artworkUrl").and_then(Value::as_str);
        let vision = artwork_url.map(|url| VisionParams {
            model: request.options.model.as_deref(),
            system_prompt: request.payload.get("systemPrompt").and_then(Value::as_str),
            prompt,
            artwork_url: url,
            image_detail: request.options.image_detail.as_deref(),
            max_tokens: request.options.max_tokens,
            response_format: None,
        });

        let rendered = engine::render_request(provider_id, endpoint_config, &ctx, &credentials, vision);

        if request.operation == Operation::MusicGeneration {
            let body = rendered.body.clone().unwrap_or(Value::Null);
            let task_id = music::submit(&self.http, &rendered.url, &rendered.headers, &body).await?;
            let poll_base = url_origin(&rendered.url);
            let outcome = music::poll_until_done(
                &self.http,
                &poll_base,
                &task_id,
                &rendered.headers,
                request.options.timeout.map(Duration::from_millis),
            )
            .await?;
            let first_clip = outcome.clips.first().cloned();
            let result = first_clip
                .as_ref()
                .and_then(|c| c.audio_url.clone())
                .map(Value::String)
                .unwrap_or(Value::Null);
            return Ok(ProviderResponse {
                provider_id: provider_id.to_string(),
                provider_name: config.provider_name.clone(),
                model: request.options.model.clone(),
                success: true,
                result: Some(result),
                error: None,
                metadata: ProviderResponseMetadata {
                    processing_time_ms: start.elapsed().as_millis() as u64,
                    is_early_playback: Some(outcome.is_early_playback),
                    ..Default::default()
                },
            });
        }

        let outcome = engine::execute(&self.http, &rendered, false).await?;

        if !(200..300).contains(&outcome.status) {
            return Err(Self::classify_http_status(
                outcome.status,
                outcome.body_text,
                outcome.status_text,
            ));
        }

        let rate_limit = crate::metrics::parse_rate_limit_headers(&outcome.headers);
        let body_json: Value = serde_json::from_str(&outcome.body_text)
            .unwrap_or_else(|_| Value::String(outcome.body_text.clone()));
        let content = engine::extract_content(&body_json, &endpoint_config.response_mapping)?;
        let usage = engine::extract_usage(&body_json);

        let metadata = ProviderResponseMetadata {
            processing_time_ms: start.elapsed().as_millis() as u64,
            tokens_used: usage.as_ref().and_then(|u| u.total_tokens),
            cost: Some(config.credit_cost),
            rate_limit_remaining: rate_limit.remaining,
            rate_limit_reset_time: rate_limit.reset_at,
            response_format: endpoint_config.response_mapping.format.clone().or(Some("text".to_string())),
            is_base64: Some(
                endpoint_config.response_mapping.format.as_deref() == Some("base64"),
            ),
            is_early_playback: None,
        };

        Ok(ProviderResponse {
            provider_id: provider_id.to_string(),
            provider_name: config.provider_name.clone(),
            model: request.options.model.clone(),
            success: true,
            result: Some(content),
            error: None,
            metadata,
        })
    }

    fn record_outcome_metrics(&self, provider_id: &str, operation: Operation, success: bool, latency_ms: f64) {
        self.metrics
            .record_provider_request(provider_id, operation_name(operation), success, latency_ms, None);
    }

    /// `invoke(ProviderRequest) -> ProviderResponse`. Tries candidates
    /// strictly sequentially; on success resets the winning breaker, on
    /// failure classifies and records the error then falls through.
    pub async fn invoke(&self, request: ProviderRequest) -> Result<ProviderResponse, ProxyError> {
        let candidates = self.candidate_order(&request).await?;
        if candidates.is_empty() {
            return Err(ProxyError::NoProvidersAvailable);
        }

        let mut last_error: Option<ProviderError> = None;
        for provider_id in &candidates {
            if !self.is_available(provider_id).await {
                continue;
            }

            let start = std::time::Instant::now();
            match self.invoke_candidate(provider_id, &request).await {
                Ok(response) => {
                    let latency = start.elapsed().as_millis() as f64;
                    self.state(provider_id).breaker.record_success().await;
                    let state = self.state(provider_id);
                    state.counters.request_count.fetch_add(1, Ordering::Relaxed);
                    state.counters.success_count.fetch_add(1, Ordering::Relaxed);
                    state
                        .counters
                        .latency_sum_ms
                        .fetch_add(latency as u64, Ordering::Relaxed);
                    self.record_outcome_metrics(provider_id, request.operation, true, latency);
                    self.metrics.publish_invocation(InvocationEvent {
                        provider_id: provider_id.clone(),
                        provider_name: response.provider_name.clone(),
                        operation: operation_name(request.operation).to_string(),
                        success: true,
                        duration_ms: latency as u64,
                        tokens_used: response.metadata.tokens_used,
                        cost: response.metadata.cost,
                        error: None,
                    });
                    return Ok(response);
                }
                Err(err) => {
                    let latency = start.elapsed().as_millis() as f64;
                    let is_client_fault = err.is_client_fault();
                    self.state(provider_id)
                        .breaker
                        .record_failure(is_client_fault)
                        .await;
                    if !is_client_fault && self.state(provider_id).breaker.status().await == CircuitBreakerStatus::Open {
                        self.metrics.record_circuit_breaker_event(provider_id, "open");
                    }
                    let state = self.state(provider_id);
                    state.counters.request_count.fetch_add(1, Ordering::Relaxed);
                    self.record_outcome_metrics(provider_id, request.operation, false, latency);
                    self.metrics.publish_invocation(InvocationEvent {
                        provider_id: provider_id.clone(),
                        provider_name: provider_id.clone(),
                        operation: operation_name(request.operation).to_string(),
                        success: false,
                        duration_ms: latency as u64,
                        tokens_used: None,
                        cost: None,
                        error: Some(err.to_string()),
                    });
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(ProxyError::ProviderUnavailable(Box::new(err))),
            None => Err(ProxyError::NoProvidersAvailable),
        }
    }

    /// `testProvider`: a direct, single-candidate invocation bypassing
    /// selection, used by connectivity checks.
    pub async fn test_provider(
        &self,
        provider_id: &str,
        payload: HashMap<String, Value>,
    ) -> Result<ProviderResponse, ProxyError> {
        let config = self
            .load_config_cached(provider_id)
            .await
            .ok_or_else(|| ProxyError::ProviderNotFound(provider_id.to_string()))?;
        let operation = match config.provider_type() {
            ProviderType::Llm => Operation::TextGeneration,
            ProviderType::Music => Operation::MusicGeneration,
            ProviderType::Image => Operation::ImageGeneration,
            ProviderType::Audio => Operation::AudioTranscription,
            ProviderType::Video | ProviderType::Text => Operation::TextGeneration,
        };
        let request = ProviderRequest {
            provider_id: Some(provider_id.to_string()),
            operation,
            payload,
            options: Default::default(),
            metadata: Default::default(),
        };
        self.invoke_candidate(provider_id, &request)
            .await
            .map_err(ProxyError::from)
    }

    pub async fn get_providers_by_capability(
        &self,
        capability: ProviderType,
    ) -> Result<Vec<ProviderConfigRecord>, ProxyError> {
        Ok(self.repository.find_active_providers(Some(capability)).await?)
    }

    pub async fn get_provider_health(&self) -> HashMap<String, ProviderHealth> {
        let keys: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        let mut out = HashMap::new();
        for key in keys {
            out.insert(key.clone(), self.snapshot_health(&key).await);
        }
        out
    }

    pub async fn get_provider_health_by_id(&self, provider_id: &str) -> Option<ProviderHealth> {
        if self.states.contains_key(provider_id) {
            Some(self.snapshot_health(provider_id).await)
        } else {
            None
        }
    }

    async fn snapshot_health(&self, provider_id: &str) -> ProviderHealth {
        let state = self.state(provider_id);
        let request_count = state.counters.request_count.load(Ordering::Relaxed);
        let success_count = state.counters.success_count.load(Ordering::Relaxed);
        let latency_sum = state.counters.latency_sum_ms.load(Ordering::Relaxed);
        ProviderHealth {
            provider_id: provider_id.to_string(),
            status: *state.status.read().unwrap(),
            last_check: *state.last_check.read().unwrap(),
            average_latency_ms: if success_count > 0 {
                latency_sum as f64 / success_count as f64
            } else {
                0.0
            },
            success_rate: if request_count > 0 {
                success_count as f64 / request_count as f64
            } else {
                0.0
            },
            request_count,
            success_count,
            circuit_breaker: state.breaker.snapshot().await,
            rate_limit_info: state.rate_limit.read().unwrap().clone(),
        }
    }

    pub fn get_usage_statistics(&self, window_minutes: i64) -> HashMap<String, crate::metrics::ProviderStats> {
        let window = chrono::Duration::minutes(window_minutes);
        self.states
            .iter()
            .map(|entry| {
                let stats = self.metrics.provider_stats(entry.key(), window);
                (entry.key().clone(), stats)
            })
            .collect()
    }

    pub async fn get_proxy_health(&self) -> ProxyHealth {
        let total = self.states.len();
        let mut open = 0usize;
        let keys: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if self.state(&key).breaker.status().await == CircuitBreakerStatus::Open {
                open += 1;
            }
        }
        ProxyHealth {
            tracked_providers: total,
            open_circuit_breakers: open,
        }
    }

    /// One tick of the health loop (§4.1.1): probe each active provider
    /// and write its health status, both in-process and to the
    /// repository's persisted `healthStatus`.
    pub async fn run_health_check_once(&self) -> Result<(), ProxyError> {
        let active = self.repository.find_all(ProviderConfigFilter {
            is_active: Some(true),
            ..Default::default()
        }).await?;

        for record in active {
            let status = self.probe_provider_health(&record).await;
            let state = self.state(&record.provider_id);
            *state.status.write().unwrap() = status;
            *state.last_check.write().unwrap() = Utc::now();
            let _ = self.repository.update_health_status(&record.provider_id, status).await;
        }
        Ok(())
    }

    async fn probe_provider_health(&self, record: &ProviderConfigRecord) -> HealthStatus {
        if is_expensive_probe_provider(&record.provider_id) {
            return HealthStatus::Healthy;
        }

        let endpoint_config = record.configuration.endpoint_config();
        let Some(health_endpoint) = &endpoint_config.health_endpoint else {
            return self.probe_via_minimal_request(record).await;
        };
        if !health_endpoint.is_free {
            return self.probe_via_minimal_request(record).await;
        }

        let mut req = match health_endpoint.method {
            crate::models::HealthCheckMethod::Get => self.http.get(&health_endpoint.url),
            crate::models::HealthCheckMethod::Head => self.http.head(&health_endpoint.url),
        };
        if health_endpoint.requires_auth {
            let credentials = self.credentials.resolve(&record.provider_id, endpoint_config.auth.as_ref());
            for (k, v) in &credentials.headers {
                req = req.header(k, v);
            }
        }
        match req.send().await {
            Ok(resp) => Self::classify_health_status(resp.status().as_u16()),
            Err(_) => HealthStatus::Unhealthy,
        }
    }

    async fn probe_via_minimal_request(&self, record: &ProviderConfigRecord) -> HealthStatus {
        let endpoint_config = record.configuration.endpoint_config();
        let credentials = self.credentials.resolve(&record.provider_id, endpoint_config.auth.as_ref());
        if !credentials.is_valid {
            return HealthStatus::Unhealthy;
        }
        let ctx = SubstitutionContext::build("ping", "health_check", &HashMap::new());
        let rendered = engine::render_request(&record.provider_id, endpoint_config, &ctx, &credentials, None);
        match engine::execute(&self.http, &rendered, true).await {
            Ok(outcome) => Self::classify_health_status(outcome.status),
            Err(_) => HealthStatus::Unhealthy,
        }
    }

    fn classify_health_status(status: u16) -> HealthStatus {
        match status {
            200..=299 => HealthStatus::Healthy,
            429 => HealthStatus::Healthy,
            400 | 422 => HealthStatus::Healthy,
            401 | 403 => HealthStatus::Unhealthy,
            500..=599 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    /// Spawn the periodic health loop on the given interval. Callers
    /// should skip this in test/dev environments per §4.1.1.
    pub fn spawn_health_loop(self: &Arc<Self>, interval: Option<Duration>) -> tokio::task::JoinHandle<()> {
        let proxy = Arc::clone(self);
        let interval = interval.unwrap_or(DEFAULT_HEALTH_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = proxy.run_health_check_once().await {
                    tracing::warn!(error = %e, "health loop iteration failed");
                }
            }
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyHealth {
    pub tracked_providers: usize,
    pub open_circuit_breakers: usize,
}

/// The scheme+host portion of a submit URL, used as the base for the
/// music poll workflow's `<base>/task/{task_id}` endpoint.
fn url_origin(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = scheme_end + 3;
        if let Some(path_start) = url[after_scheme..].find('/') {
            return url[..after_scheme + path_start].to_string();
        }
    }
    url.to_string()
}

fn operation_name(op: Operation) -> &'static str {
    match op {
        Operation::TextGeneration => "text_generation",
        Operation::TextAnalysis => "text_analysis",
        Operation::MusicGeneration => "music_generation",
        Operation::ImageGeneration => "image_generation",
        Operation::AudioTranscription => "audio_transcription",
        Operation::ImageAnalysis => "image_analysis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        HttpMethod, ProviderConfigRecord, ProviderEndpointConfig, ProviderTypeConfig, ResponseMapping,
    };
    use crate::repository::InMemoryProviderConfigRepository;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm_config(endpoint: String, priority: i32, provider_id: &str) -> ProviderConfigRecord {
        ProviderConfigRecord {
            id: 0,
            provider_id: provider_id.to_string(),
            provider_name: provider_id.to_string(),
            configuration: ProviderTypeConfig::Llm(ProviderEndpointConfig {
                endpoint,
                request_template: serde_json::json!({"prompt": "${prompt}"}),
                response_mapping: ResponseMapping {
                    content: "choices[0].message.content".to_string(),
                    artwork_url: None,
                    audio_url: None,
                    format: None,
                },
                method: HttpMethod::Post,
                headers: Default::default(),
                timeout: Some(Duration::from_secs(5)),
                models: vec![],
                auth: None,
                health_endpoint: None,
            }),
            is_active: true,
            is_primary: false,
            priority,
            cost_per_unit: "0.001".to_string(),
            credit_cost: 0.5,
            health_status: HealthStatus::Unknown,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: None,
            updated_by: None,
        }
    }

    fn sample_request(provider_id: Option<&str>) -> ProviderRequest {
        ProviderRequest {
            provider_id: provider_id.map(|s| s.to_string()),
            operation: Operation::TextGeneration,
            payload: HashMap::from([("prompt".to_string(), Value::String("hi".to_string()))]),
            options: Default::default(),
            metadata: Default::default(),
        }
    }

    async fn proxy_with(repo: InMemoryProviderConfigRepository) -> ProviderProxy {
        ProviderProxy::new(Arc::new(repo), Arc::new(MetricsCollector::noop()))
    }

    #[tokio::test]
    async fn invoke_succeeds_against_mock_provider() {
        std::env::set_var("MOCKP_API_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello back"}}]
            })))
            .mount(&server)
            .await;

        let repo = InMemoryProviderConfigRepository::new();
        repo.create(llm_config(format!("{}/v1/chat", server.uri()), 1, "mockp"))
            .await
            .unwrap();
        let proxy = proxy_with(repo).await;

        let response = proxy.invoke(sample_request(Some("mockp"))).await.unwrap();
        assert!(response.success);
        assert_eq!(response.result.unwrap(), Value::String("hello back".to_string()));
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_threshold_failures() {
        std::env::set_var("FLAKY_API_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repo = InMemoryProviderConfigRepository::new();
        repo.create(llm_config(format!("{}/v1/chat", server.uri()), 1, "flaky"))
            .await
            .unwrap();
        let proxy = proxy_with(repo).await;

        for _ in 0..5 {
            let _ = proxy.invoke(sample_request(Some("flaky"))).await;
        }

        let health = proxy.get_provider_health_by_id("flaky").await.unwrap();
        assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Open);

        let err = proxy.invoke(sample_request(Some("flaky"))).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ProxyErrorKind::NoProvidersAvailable);
    }

    #[tokio::test]
    async fn client_error_does_not_trip_breaker() {
        std::env::set_var("BADREQ_API_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let repo = InMemoryProviderConfigRepository::new();
        repo.create(llm_config(format!("{}/v1/chat", server.uri()), 1, "badreq"))
            .await
            .unwrap();
        let proxy = proxy_with(repo).await;

        let err = proxy.invoke(sample_request(Some("badreq"))).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ProxyErrorKind::ProviderUnavailable);

        let health = proxy.get_provider_health_by_id("badreq").await.unwrap();
        assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Closed);
        assert_eq!(health.circuit_breaker.failures, 0);
    }

    #[tokio::test]
    async fn selection_falls_back_in_priority_order() {
        std::env::set_var("PRIMARY_API_KEY", "test-key");
        std::env::set_var("SECONDARY_API_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "from secondary"}}]
            })))
            .mount(&server)
            .await;

        let repo = InMemoryProviderConfigRepository::new();
        // primary points nowhere (connection refused); fallback is the mock server.
        repo.create(llm_config("http://127.0.0.1:1/v1/chat".to_string(), 1, "primary"))
            .await
            .unwrap();
        repo.create(llm_config(format!("{}/v1/chat", server.uri()), 2, "secondary"))
            .await
            .unwrap();
        let proxy = proxy_with(repo).await;

        let response = proxy.invoke(sample_request(None)).await.unwrap();
        assert_eq!(response.provider_id, "secondary");
    }
}
