//! HTTP Provider Engine.
//!
//! Turns a `(ProviderConfiguration, logical request, resolved credentials)`
//! tuple into a concrete HTTP call and back into normalized content.
//! Operates without any knowledge of business semantics: everything
//! provider-specific lives in the database-driven `ProviderEndpointConfig`.

use crate::credentials::ResolvedCredentials;
use crate::error::ProviderError;
use crate::models::{HttpMethod, ProviderEndpointConfig, ProviderResponseMetadata};
use regex_lite::Regex;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Per-provider default timeouts (spec §4.2), consulted after the template
/// and environment-override tiers and before the global fallback.
fn per_provider_default_timeout(provider_id: &str) -> Option<Duration> {
    match provider_id {
        "openai" | "anthropic" => Some(Duration::from_secs(60)),
        "elevenlabs" => Some(Duration::from_secs(90)),
        "musicapi" => Some(Duration::from_secs(120)),
        "stability-ai" => Some(Duration::from_secs(60)),
        _ => None,
    }
}

const GLOBAL_DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

fn env_timeout_override(provider_id: &str) -> Option<Duration> {
    let var = format!("{}_TIMEOUT_MS", provider_id.to_uppercase().replace('-', "_"));
    std::env::var(&var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn global_timeout_override() -> Option<Duration> {
    std::env::var("AI_REQUEST_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// First non-zero wins: template timeout, env override, per-provider
/// default table, global fallback.
pub fn select_timeout(provider_id: &str, template_timeout: Option<Duration>) -> Duration {
    template_timeout
        .filter(|d| !d.is_zero())
        .or_else(|| env_timeout_override(provider_id))
        .or_else(|| per_provider_default_timeout(provider_id))
        .or_else(global_timeout_override)
        .unwrap_or(GLOBAL_DEFAULT_TIMEOUT)
}

/// The substitution context fed to the renderer. MUST NOT contain secrets.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext(pub serde_json::Map<String, Value>);

impl SubstitutionContext {
    pub fn build(prompt: &str, modality: &str, options: &HashMap<String, Value>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("prompt".to_string(), Value::String(prompt.to_string()));
        map.insert("modality".to_string(), Value::String(modality.to_string()));
        for (k, v) in options {
            map.insert(k.clone(), v.clone());
        }
        Self(map)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.0.get(name).map(value_to_template_string)
    }
}

fn value_to_template_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

static PLACEHOLDER_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").unwrap())
}

/// Replace every `${name}` occurrence in `input` using the substitution
/// context. Unresolved names render as an empty string.
fn substitute_string(input: &str, ctx: &SubstitutionContext) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex_lite::Captures| {
            ctx.lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Recursively render a JSON value: arrays stay arrays, objects stay
/// objects, every string leaf is substituted.
fn render_json_template(value: &Value, ctx: &SubstitutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_string(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_json_template(v, ctx)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_json_template(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// A fully rendered logical request, ready to execute.
pub struct RenderedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Parameters for building a vision-style body (an `artworkUrl` present in
/// the caller's options).
pub struct VisionParams<'a> {
    pub model: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub prompt: &'a str,
    pub artwork_url: &'a str,
    pub image_detail: Option<&'a str>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<&'a Value>,
}

fn build_vision_body(params: &VisionParams) -> Value {
    let mut messages = Vec::new();
    if let Some(sp) = params.system_prompt {
        messages.push(serde_json::json!({"role": "system", "content": sp}));
    }
    messages.push(serde_json::json!({
        "role": "user",
        "content": [
            {"type": "text", "text": params.prompt},
            {
                "type": "image_url",
                "image_url": {
                    "url": params.artwork_url,
                    "detail": params.image_detail.unwrap_or("low"),
                }
            }
        ]
    }));

    let mut body = serde_json::json!({
        "model": params.model,
        "messages": messages,
    });
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(rf) = params.response_format {
        body["response_format"] = rf.clone();
    }
    body
}

/// Build the concrete HTTP request from the provider's endpoint
/// configuration, the substitution context, and resolved credentials.
pub fn render_request(
    provider_id: &str,
    config: &ProviderEndpointConfig,
    ctx: &SubstitutionContext,
    credentials: &ResolvedCredentials,
    vision: Option<VisionParams>,
) -> RenderedRequest {
    let mut url = substitute_string(&config.endpoint, ctx);
    if !credentials.query.is_empty() {
        let mut pairs: Vec<String> = credentials
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect();
        pairs.sort();
        let sep = if url.contains('?') { '&' } else { '?' };
        url = format!("{url}{sep}{}", pairs.join("&"));
    }

    let mut headers: HashMap<String, String> = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    for (k, v) in &config.headers {
        headers.insert(k.clone(), substitute_string(v, ctx));
    }
    // Credentials always win over templated static headers.
    for (k, v) in &credentials.headers {
        headers.insert(k.clone(), v.clone());
    }

    let body = if config.method == HttpMethod::Get {
        None
    } else if let Some(vision) = vision {
        Some(build_vision_body(&vision))
    } else {
        Some(render_json_template(&config.request_template, ctx))
    };

    RenderedRequest {
        method: config.method,
        url,
        headers,
        body,
        timeout: select_timeout(provider_id, config.timeout),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Executes a rendered request with the Engine's retry/timeout contract:
/// a cancellable per-request deadline, and up to two retries with
/// exponential backoff on 502/503/504. Every other status is returned
/// as-is for the proxy's candidate loop to classify and fall back on.
pub struct ExecutionOutcome {
    pub status: u16,
    pub status_text: String,
    pub headers: reqwest::header::HeaderMap,
    pub body_text: String,
}

pub async fn execute(
    client: &Client,
    request: &RenderedRequest,
    suppress_logging: bool,
) -> Result<ExecutionOutcome, ProviderError> {
    const MAX_RETRIES: u32 = 2;
    const BASE_DELAY_MS: u64 = 1000;

    let mut attempt = 0u32;
    loop {
        let outcome = execute_once(client, request).await?;
        let retry_eligible = matches!(outcome.status, 502 | 503 | 504);
        if retry_eligible && attempt < MAX_RETRIES {
            let delay = BASE_DELAY_MS * 2u64.pow(attempt);
            if !suppress_logging {
                tracing::warn!(
                    status = outcome.status,
                    attempt,
                    delay_ms = delay,
                    "retrying provider invocation"
                );
            }
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
            continue;
        }
        return Ok(outcome);
    }
}

async fn execute_once(
    client: &Client,
    request: &RenderedRequest,
) -> Result<ExecutionOutcome, ProviderError> {
    let mut builder = client.request(request.method.as_reqwest(), &request.url);
    for (k, v) in &request.headers {
        builder = builder.header(k, v);
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let fut = builder.send();
    let response = match tokio::time::timeout(request.timeout, fut).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            if e.is_connect() || e.is_request() {
                return Err(ProviderError::NetworkError(e.to_string()));
            }
            return Err(ProviderError::Http(e));
        }
        Err(_) => return Err(ProviderError::Timeout),
    };

    let status = response.status().as_u16();
    let status_text = response
        .status()
        .canonical_reason()
        .unwrap_or("Unknown")
        .to_string();
    let headers = response.headers().clone();
    let body_text = response.text().await.unwrap_or_default();

    Ok(ExecutionOutcome {
        status,
        status_text,
        headers,
        body_text,
    })
}

/// Parse a dotted/bracketed path (`choices[0].message.content`) against a
/// JSON value.
pub fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value.clone();
    for segment in parse_path(path) {
        match segment {
            PathSegment::Key(k) => {
                current = current.get(&k)?.clone();
            }
            PathSegment::Index(i) => {
                current = current.get(i)?.clone();
            }
        }
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        while let Some(bracket_start) = rest.find('[') {
            let key = &rest[..bracket_start];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            let bracket_end = rest[bracket_start..].find(']').map(|i| i + bracket_start);
            if let Some(end) = bracket_end {
                if let Ok(idx) = rest[bracket_start + 1..end].parse::<usize>() {
                    segments.push(PathSegment::Index(idx));
                }
                rest = &rest[end + 1..];
            } else {
                break;
            }
        }
        if !rest.is_empty() {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    segments
}

fn is_non_empty_trimmed(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// Well-known response shapes probed in order when `responseMapping` does
/// not yield content.
const FALLBACK_PROBES: &[&str] = &[
    "choices[0].message.content",
    "content",
    "text",
    "output",
    "data[0].url",
];

fn is_structured_json_literal(s: &str) -> bool {
    let trimmed = s.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Extract normalized content from a provider's JSON response per §4.2's
/// extraction/fallback/emptiness rules.
pub fn extract_content(
    response: &Value,
    mapping: &crate::models::ResponseMapping,
) -> Result<Value, ProviderError> {
    let content = extract_path(response, &mapping.content).filter(|v| match v {
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        _ => true,
    });

    let candidate = content
        .or_else(|| {
            mapping
                .artwork_url
                .as_ref()
                .and_then(|p| extract_path(response, p))
                .filter(is_non_empty_trimmed)
        })
        .or_else(|| {
            mapping
                .audio_url
                .as_ref()
                .and_then(|p| extract_path(response, p))
                .filter(is_non_empty_trimmed)
        })
        .or_else(|| {
            FALLBACK_PROBES
                .iter()
                .find_map(|probe| extract_path(response, probe).filter(is_non_empty_trimmed))
        })
        .unwrap_or_else(|| Value::String(response.to_string()));

    let empty = match &candidate {
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if empty {
        let is_structured = match &candidate {
            Value::String(s) => is_structured_json_literal(s),
            Value::Object(_) | Value::Array(_) => true,
            _ => false,
        };
        if !is_structured {
            return Err(ProviderError::InvocationFailed(
                "returned empty content".to_string(),
            ));
        }
    }

    Ok(candidate)
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Extract token usage from either OpenAI (`prompt_tokens`/`completion_tokens`/
/// `total_tokens`) or Anthropic (`input_tokens`/`output_tokens`) shapes.
pub fn extract_usage(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usage")?;
    let prompt = usage
        .get("prompt_tokens")
        .or_else(|| usage.get("input_tokens"))
        .and_then(Value::as_u64);
    let completion = usage
        .get("completion_tokens")
        .or_else(|| usage.get("output_tokens"))
        .and_then(Value::as_u64);
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .or_else(|| match (prompt, completion) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        });
    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

pub fn build_response_metadata(
    outcome: &ExecutionOutcome,
    mapping: &crate::models::ResponseMapping,
    processing_time_ms: u64,
) -> ProviderResponseMetadata {
    let format = mapping.format.clone().unwrap_or_else(|| "text".to_string());
    ProviderResponseMetadata {
        processing_time_ms,
        tokens_used: None,
        cost: None,
        rate_limit_remaining: None,
        rate_limit_reset_time: None,
        response_format: Some(format.clone()),
        is_base64: Some(format == "base64"),
        is_early_playback: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseMapping;

    #[test]
    fn timeout_selection_prefers_template_then_env_then_default() {
        std::env::remove_var("TESTPROV_TIMEOUT_MS");
        assert_eq!(
            select_timeout("testprov", Some(Duration::from_millis(1234))),
            Duration::from_millis(1234)
        );
        assert_eq!(select_timeout("openai", None), Duration::from_secs(60));
        assert_eq!(select_timeout("unknown-provider", None), GLOBAL_DEFAULT_TIMEOUT);
    }

    #[test]
    fn env_timeout_override_wins_over_provider_default() {
        std::env::set_var("OPENAI_TIMEOUT_MS", "5000");
        assert_eq!(select_timeout("openai", None), Duration::from_millis(5000));
        std::env::remove_var("OPENAI_TIMEOUT_MS");
    }

    #[test]
    fn substitution_replaces_dollar_brace_placeholders() {
        let mut options = HashMap::new();
        options.insert("model".to_string(), Value::String("gpt-4".to_string()));
        let ctx = SubstitutionContext::build("hello", "text_generation", &options);
        assert_eq!(substitute_string("model=${model}", &ctx), "model=gpt-4");
    }

    #[test]
    fn extract_path_handles_bracket_index() {
        let v = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        let extracted = extract_path(&v, "choices[0].message.content").unwrap();
        assert_eq!(extracted, Value::String("hi".to_string()));
    }

    #[test]
    fn extract_content_falls_back_to_well_known_shapes() {
        let mapping = ResponseMapping {
            content: "nonexistent.path".to_string(),
            artwork_url: None,
            audio_url: None,
            format: None,
        };
        let response = serde_json::json!({"text": "fallback text"});
        let content = extract_content(&response, &mapping).unwrap();
        assert_eq!(content, Value::String("fallback text".to_string()));
    }

    #[test]
    fn extract_content_fails_on_empty_unstructured() {
        let mapping = ResponseMapping {
            content: "missing".to_string(),
            artwork_url: None,
            audio_url: None,
            format: None,
        };
        let response = serde_json::json!({});
        let err = extract_content(&response, &mapping).unwrap_err();
        assert!(matches!(err, ProviderError::InvocationFailed(_)));
    }

    #[test]
    fn extract_usage_prefers_openai_field_names() {
        let response = serde_json::json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}});
        let usage = extract_usage(&response).unwrap();
        assert_eq!(usage.total_tokens, Some(15));
    }

    #[test]
    fn extract_usage_handles_anthropic_field_names() {
        let response = serde_json::json!({"usage": {"input_tokens": 8, "output_tokens": 2}});
        let usage = extract_usage(&response).unwrap();
        assert_eq!(usage.prompt_tokens, Some(8));
        assert_eq!(usage.total_tokens, Some(10));
    }

    #[test]
    fn vision_body_shapes_messages_with_image_url() {
        let params = VisionParams {
            model: Some("gpt-4-vision"),
            system_prompt: Some("be concise"),
            prompt: "what is this?",
            artwork_url: "https://img/x.png",
            image_detail: None,
            max_tokens: Some(300),
            response_format: None,
        };
        let body = build_vision_body(&params);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][1]["image_url"]["detail"], "low");
    }
}
