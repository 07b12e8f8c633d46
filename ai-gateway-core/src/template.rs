//! Template Execution.
//!
//! Renders a stored [`Template`](crate::models::Template) against a variable
//! map. Three surface syntaxes — `${var}`, `{{var}}`, and a `|default:`
//! pipe — are normalized into one mustache-style engine ([`handlebars`])
//! with HTML escaping disabled and a small, enumerated helper set
//! (`default`, `eq`, `and`, `or`). A render failure never surfaces past
//! `executeTemplate`: it falls back to plain string substitution instead.

use crate::cache::{self, TtlLruCache};
use crate::models::Template;
use handlebars::Handlebars;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Narrow read contract the executor consumes; template CRUD itself is an
/// external collaborator (out of scope here).
pub trait TemplateSource: Send + Sync {
    fn get_template(&self, id: &str) -> Option<Template>;
}

/// In-process template store, useful for the composition root when no
/// external template service is wired up, and for tests.
#[derive(Default)]
pub struct InMemoryTemplateSource {
    templates: std::sync::RwLock<HashMap<String, Template>>,
}

impl InMemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: Template) {
        self.templates.write().unwrap().insert(template.id.clone(), template);
    }
}

impl TemplateSource for InMemoryTemplateSource {
    fn get_template(&self, id: &str) -> Option<Template> {
        self.templates.read().unwrap().get(id).cloned()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateUsedSummary {
    pub id: String,
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteTemplateResponse {
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub messages: Option<Vec<TemplateMessage>>,
    pub execution_time_ms: u64,
    pub template_used: Option<TemplateUsedSummary>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub preview: Option<String>,
    pub missing_variables: Vec<String>,
    pub unused_variables: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchExecutionResult {
    pub execution_id: String,
    pub template_id: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchExecuteResponse {
    pub results: Vec<BatchExecutionResult>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_execution_time_ms: u64,
}

/// Normalize `${var}`, `{{var|default:"x"}}` and `{{var|default:y}}` into
/// plain handlebars syntax the registered `default` helper understands.
fn normalize_syntax(content: &str) -> String {
    let dollar_re = regex_lite::Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").unwrap();
    let step1 = dollar_re.replace_all(content, "{{$1}}");

    let default_quoted_re =
        regex_lite::Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*\|\s*default\s*:\s*"([^"]*)"\s*\}\}"#)
            .unwrap();
    let step2 = default_quoted_re.replace_all(&step1, "{{default $1 \"$2\"}}");

    let default_single_re =
        regex_lite::Regex::new(r"\{\{\s*([a-zA-Z0-9_.]+)\s*\|\s*default\s*:\s*'([^']*)'\s*\}\}")
            .unwrap();
    let step3 = default_single_re.replace_all(&step2, "{{default $1 \"$2\"}}");

    let default_bare_re = regex_lite::Regex::new(
        r"\{\{\s*([a-zA-Z0-9_.]+)\s*\|\s*default\s*:\s*([a-zA-Z0-9_.]+)\s*\}\}",
    )
    .unwrap();
    default_bare_re
        .replace_all(&step3, "{{default $1 $2}}")
        .into_owned()
}

fn build_engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_escape_fn(handlebars::no_escape);

    hb.register_helper(
        "default",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let value = h.param(0).map(|p| p.value().clone()).unwrap_or(Value::Null);
                let fallback = h.param(1).map(|p| p.value().clone()).unwrap_or(Value::Null);
                let chosen = if is_blank(&value) { fallback } else { value };
                out.write(&value_to_string(&chosen))?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "eq",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let a = h.param(0).map(|p| p.value().clone()).unwrap_or(Value::Null);
                let b = h.param(1).map(|p| p.value().clone()).unwrap_or(Value::Null);
                out.write(&(a == b).to_string())?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "and",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let all_truthy = h.params().iter().all(|p| is_truthy(p.value()));
                out.write(&all_truthy.to_string())?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "or",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let any_truthy = h.params().iter().any(|p| is_truthy(p.value()));
                out.write(&any_truthy.to_string())?;
                Ok(())
            },
        ),
    );
    hb
}

fn is_blank(v: &Value) -> bool {
    matches!(v, Value::Null) || matches!(v, Value::String(s) if s.is_empty())
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Fallback renderer used when the handlebars engine returns an error:
/// plain `${var}`/`{{var}}` substitution, arrays comma-joined, objects
/// stringified as JSON.
fn simple_substitute(content: &str, vars: &serde_json::Map<String, Value>) -> String {
    let mut out = content.to_string();
    for (key, value) in vars {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(value_to_string)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => value.to_string(),
            other => value_to_string(other),
        };
        out = out.replace(&format!("${{{key}}}"), &rendered);
        out = out.replace(&format!("{{{{{key}}}}}"), &rendered);
    }
    out
}

pub struct TemplateExecutor {
    source: Arc<dyn TemplateSource>,
    engine: Handlebars<'static>,
    template_cache: TtlLruCache<Template>,
    execution_cache: TtlLruCache<ExecuteTemplateResponse>,
}

impl TemplateExecutor {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            engine: build_engine(),
            template_cache: TtlLruCache::new(cache::TEMPLATE_CACHE_MAX, cache::TEMPLATE_CACHE_TTL),
            execution_cache: TtlLruCache::new(cache::EXECUTION_CACHE_MAX, cache::EXECUTION_CACHE_TTL),
        }
    }

    fn load_template(&self, id: &str) -> Option<Template> {
        if let Some(t) = self.template_cache.get(id) {
            return Some(t);
        }
        let t = self.source.get_template(id)?;
        self.template_cache.set(id.to_string(), t.clone());
        Some(t)
    }

    /// Idempotent insert: re-caching the same template id twice must not
    /// change cache size, and a subsequent read must return it.
    pub fn cache_template(&self, template: Template) {
        self.template_cache.set(template.id.clone(), template);
    }

    pub fn get_cached_template(&self, id: &str) -> Option<Template> {
        self.template_cache.get(id)
    }

    fn render_one(&self, content: &str, vars: &Value) -> Result<String, String> {
        let normalized = normalize_syntax(content);
        match self.engine.render_template(&normalized, vars) {
            Ok(rendered) => Ok(rendered),
            Err(_err) => {
                let obj = vars.as_object().cloned().unwrap_or_default();
                Ok(simple_substitute(content, &obj))
            }
        }
    }

    pub fn execute_template(&self, template_id: &str, variables: Value) -> ExecuteTemplateResponse {
        let start = std::time::Instant::now();
        let Some(template) = self.load_template(template_id) else {
            return ExecuteTemplateResponse {
                success: false,
                result: None,
                error: Some(format!("template not found: {template_id}")),
                system_prompt: None,
                user_prompt: None,
                messages: None,
                execution_time_ms: elapsed_ms(start),
                template_used: None,
            };
        };

        if !template.is_active {
            return ExecuteTemplateResponse {
                success: false,
                result: None,
                error: Some("template is not active".to_string()),
                system_prompt: None,
                user_prompt: None,
                messages: None,
                execution_time_ms: elapsed_ms(start),
                template_used: None,
            };
        }

        let var_obj = variables.as_object().cloned().unwrap_or_default();
        let missing: Vec<String> = template
            .variables
            .iter()
            .filter(|v| v.required && !var_obj.contains_key(&v.name))
            .map(|v| v.name.clone())
            .collect();
        if !missing.is_empty() {
            return ExecuteTemplateResponse {
                success: false,
                result: None,
                error: Some(format!("Missing required variables: {}", missing.join(", "))),
                system_prompt: None,
                user_prompt: None,
                messages: None,
                execution_time_ms: elapsed_ms(start),
                template_used: None,
            };
        }

        let exec_key = cache::generate_execution_key(template_id, &variables);
        if let Some(cached) = self.execution_cache.get(&exec_key) {
            return cached;
        }

        let rendered = match self.render_one(&template.content, &variables) {
            Ok(r) => r,
            Err(e) => {
                return ExecuteTemplateResponse {
                    success: false,
                    result: None,
                    error: Some(e),
                    system_prompt: None,
                    user_prompt: None,
                    messages: None,
                    execution_time_ms: elapsed_ms(start),
                    template_used: None,
                }
            }
        };

        let system_prompt = template
            .system_prompt
            .as_ref()
            .and_then(|p| self.render_one(p, &variables).ok());
        let user_prompt = template
            .user_prompt
            .as_ref()
            .and_then(|p| self.render_one(p, &variables).ok());

        let mut messages = Vec::new();
        if let Some(sp) = &system_prompt {
            messages.push(TemplateMessage {
                role: "system",
                content: sp.clone(),
            });
        }
        if let Some(up) = &user_prompt {
            messages.push(TemplateMessage {
                role: "user",
                content: up.clone(),
            });
        }

        let response = ExecuteTemplateResponse {
            success: true,
            result: Some(rendered),
            error: None,
            system_prompt,
            user_prompt,
            messages: if messages.is_empty() { None } else { Some(messages) },
            execution_time_ms: elapsed_ms(start),
            template_used: Some(TemplateUsedSummary {
                id: template.id.clone(),
                name: template.name.clone(),
                version: template.version,
            }),
        };

        self.execution_cache.set(exec_key, response.clone());
        response
    }

    pub fn preview_template(&self, template_id: &str, variables: Value) -> PreviewResponse {
        let Some(template) = self.load_template(template_id) else {
            return PreviewResponse {
                success: false,
                preview: None,
                missing_variables: vec![],
                unused_variables: vec![],
            };
        };

        let var_obj = variables.as_object().cloned().unwrap_or_default();
        let missing: Vec<String> = template
            .variables
            .iter()
            .filter(|v| v.required && !var_obj.contains_key(&v.name))
            .map(|v| v.name.clone())
            .collect();
        let declared: std::collections::HashSet<&str> =
            template.variables.iter().map(|v| v.name.as_str()).collect();
        let unused: Vec<String> = var_obj
            .keys()
            .filter(|k| !declared.contains(k.as_str()))
            .cloned()
            .collect();

        let preview = self.render_one(&template.content, &variables).ok();

        PreviewResponse {
            success: missing.is_empty(),
            preview,
            missing_variables: missing,
            unused_variables: unused,
        }
    }

    pub fn batch_execute(
        &self,
        executions: Vec<(String, Value)>,
        stop_on_first_error: bool,
    ) -> BatchExecuteResponse {
        let start = std::time::Instant::now();
        let mut results = Vec::with_capacity(executions.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        for (idx, (template_id, vars)) in executions.into_iter().enumerate() {
            let response = self.execute_template(&template_id, vars);
            let success = response.success;
            results.push(BatchExecutionResult {
                execution_id: format!("batch_{idx}"),
                template_id,
                success,
                result: response.result,
                error: response.error,
                execution_time_ms: response.execution_time_ms,
            });
            if success {
                successful += 1;
            } else {
                failed += 1;
                if stop_on_first_error {
                    break;
                }
            }
        }

        BatchExecuteResponse {
            total: results.len(),
            successful,
            failed,
            results,
            total_execution_time_ms: elapsed_ms(start),
        }
    }

    pub fn invalidate_template(&self, template_id: &str) {
        self.template_cache.invalidate(template_id);
        self.execution_cache.retain_keys(|_, response| {
            response
                .template_used
                .as_ref()
                .map(|t| t.id != template_id)
                .unwrap_or(true)
        });
    }

    pub fn sweep_expired(&self) {
        self.template_cache.sweep_expired();
        self.execution_cache.sweep_expired();
    }

    pub fn cache_stats(&self) -> (cache::CacheStats, cache::CacheStats) {
        (self.template_cache.stats(), self.execution_cache.stats())
    }
}

fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TemplateVariable;

    fn basic_template(content: &str, required: bool) -> Template {
        Template {
            id: "tpl-1".to_string(),
            name: "greeting".to_string(),
            category: "test".to_string(),
            content: content.to_string(),
            system_prompt: None,
            user_prompt: None,
            variables: vec![TemplateVariable {
                name: "name".to_string(),
                var_type: "string".to_string(),
                required,
                default_value: None,
            }],
            is_active: true,
            version: 1,
        }
    }

    fn executor_with(template: Template) -> TemplateExecutor {
        let source = Arc::new(InMemoryTemplateSource::new());
        source.insert(template);
        TemplateExecutor::new(source)
    }

    #[test]
    fn substitutes_simple_variable() {
        let executor = executor_with(basic_template("Hello {{name}}!", true));
        let response = executor.execute_template("tpl-1", serde_json::json!({"name": "World"}));
        assert!(response.success);
        assert_eq!(response.result.unwrap(), "Hello World!");
    }

    #[test]
    fn inactive_template_fails() {
        let mut template = basic_template("Hello {{name}}!", true);
        template.is_active = false;
        let executor = executor_with(template);
        let response = executor.execute_template("tpl-1", serde_json::json!({"name": "World"}));
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not active"));
    }

    #[test]
    fn missing_required_variable_fails() {
        let executor = executor_with(basic_template("Hello {{name}}!", true));
        let response = executor.execute_template("tpl-1", serde_json::json!({}));
        assert!(!response.success);
        let err = response.error.unwrap();
        assert!(err.contains("Missing required variables"));
        assert!(err.contains("name"));
    }

    #[test]
    fn default_helper_uses_fallback() {
        let executor = executor_with(basic_template("Hello {{default name \"Guest\"}}!", false));
        let response = executor.execute_template("tpl-1", serde_json::json!({}));
        assert!(response.success);
        assert_eq!(response.result.unwrap(), "Hello Guest!");

        let response2 = executor.execute_template("tpl-1", serde_json::json!({"name": "Alice"}));
        assert_eq!(response2.result.unwrap(), "Hello Alice!");
    }

    #[test]
    fn dollar_brace_syntax_is_normalized() {
        let executor = executor_with(basic_template("Hi ${name}.", true));
        let response = executor.execute_template("tpl-1", serde_json::json!({"name": "Sam"}));
        assert!(response.success);
        assert_eq!(response.result.unwrap(), "Hi Sam.");
    }

    #[test]
    fn cache_template_is_idempotent() {
        let executor = executor_with(basic_template("Hello {{name}}!", true));
        let t = executor.load_template("tpl-1").unwrap();
        executor.cache_template(t.clone());
        let before = executor.cache_stats().0;
        executor.cache_template(t.clone());
        let after = executor.cache_stats().0;
        assert_eq!(before.evictions, after.evictions);
        assert_eq!(executor.get_cached_template("tpl-1").unwrap().id, "tpl-1");
    }

    #[test]
    fn preview_reports_missing_and_unused() {
        let executor = executor_with(basic_template("Hello {{name}}!", true));
        let preview = executor.preview_template("tpl-1", serde_json::json!({"extra": "x"}));
        assert!(!preview.success);
        assert_eq!(preview.missing_variables, vec!["name".to_string()]);
        assert_eq!(preview.unused_variables, vec!["extra".to_string()]);
    }

    #[test]
    fn batch_stops_on_first_error_when_requested() {
        let executor = executor_with(basic_template("Hello {{name}}!", true));
        let batch = executor.batch_execute(
            vec![
                ("tpl-1".to_string(), serde_json::json!({})),
                ("tpl-1".to_string(), serde_json::json!({"name": "X"})),
            ],
            true,
        );
        assert_eq!(batch.total, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.successful, 0);
    }
}
