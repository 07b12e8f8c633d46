//! Credentials Resolver.
//!
//! Composes auth headers/query parameters from environment variables and a
//! provider's `authConfig`, with strict separation from the templating
//! substitution context: secrets never enter that context, only this
//! resolver's output does.

use crate::cache::TtlLruCache;
use crate::common::masking::mask_credential_display;
use crate::models::AuthConfig;
use std::collections::HashMap;
use std::time::Duration;

const CREDENTIAL_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct ResolvedCredentials {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub is_valid: bool,
    pub missing_credentials: Vec<String>,
}

/// Fixed secret-name to header-name mapping consulted before falling back
/// to the provider-prefixed form and then the generic `X-Title-Cased` name.
fn fixed_header_table() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("ORGANIZATION_ID", "OpenAI-Organization"),
        ("PROJECT_ID", "OpenAI-Project"),
        ("WORKSPACE_ID", "X-Workspace-ID"),
        ("ANTHROPIC_VERSION", "anthropic-version"),
    ])
}

fn default_api_key_env_var(provider_id: &str) -> String {
    format!("{}_API_KEY", provider_id.to_uppercase().replace('-', "_"))
}

fn title_cased_header_name(secret_name: &str) -> String {
    let words: Vec<String> = secret_name
        .split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect();
    format!("X-{}", words.join("-"))
}

fn header_name_for_secret(provider_id: &str, secret_name: &str) -> String {
    let table = fixed_header_table();
    if let Some(h) = table.get(secret_name) {
        return h.to_string();
    }
    let prefixed = format!("{}_{}", provider_id.to_uppercase().replace('-', "_"), secret_name);
    if let Some(h) = table.get(prefixed.as_str()) {
        return h.to_string();
    }
    title_cased_header_name(secret_name)
}

pub struct CredentialsResolver {
    cache: TtlLruCache<ResolvedCredentials>,
}

impl Default for CredentialsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialsResolver {
    pub fn new() -> Self {
        Self {
            cache: TtlLruCache::new(10_000, CREDENTIAL_CACHE_TTL),
        }
    }

    fn cache_key(provider_id: &str, auth_config: Option<&AuthConfig>) -> String {
        let serialized = auth_config
            .map(|c| serde_json::to_string(c).unwrap_or_default())
            .unwrap_or_default();
        format!("{provider_id}::{serialized}")
    }

    pub fn resolve(&self, provider_id: &str, auth_config: Option<&AuthConfig>) -> ResolvedCredentials {
        let key = Self::cache_key(provider_id, auth_config);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }
        let resolved = Self::resolve_uncached(provider_id, auth_config);
        self.cache.set(key, resolved.clone());
        resolved
    }

    fn resolve_uncached(provider_id: &str, auth_config: Option<&AuthConfig>) -> ResolvedCredentials {
        let resolved = Self::resolve_uncached_inner(provider_id, auth_config);
        if debug_provider_auth_enabled() {
            tracing::debug!(
                provider_id,
                is_valid = resolved.is_valid,
                missing = ?resolved.missing_credentials,
                headers = ?mask_credential_display_map(&resolved.headers),
                "resolved provider credentials"
            );
        }
        resolved
    }

    fn resolve_uncached_inner(provider_id: &str, auth_config: Option<&AuthConfig>) -> ResolvedCredentials {
        let Some(cfg) = auth_config else {
            let env_var = default_api_key_env_var(provider_id);
            return match env_var_value(&env_var) {
                Some(key) => {
                    let mut headers = HashMap::new();
                    headers.insert("Authorization".to_string(), format!("Bearer {key}"));
                    ResolvedCredentials {
                        headers,
                        query: HashMap::new(),
                        is_valid: true,
                        missing_credentials: Vec::new(),
                    }
                }
                None => ResolvedCredentials {
                    headers: HashMap::new(),
                    query: HashMap::new(),
                    is_valid: false,
                    missing_credentials: vec![env_var],
                },
            };
        };

        let env_var = cfg
            .env_var_name
            .clone()
            .unwrap_or_else(|| default_api_key_env_var(provider_id));

        let Some(key) = env_var_value(&env_var) else {
            return ResolvedCredentials {
                headers: HashMap::new(),
                query: HashMap::new(),
                is_valid: false,
                missing_credentials: vec![env_var],
            };
        };

        let header_value = match &cfg.scheme {
            Some(scheme) => format!("{scheme} {key}"),
            None => key,
        };
        let mut headers = HashMap::new();
        headers.insert(cfg.header_name.clone(), header_value);

        let mut missing = Vec::new();
        for secret_name in &cfg.required_secrets {
            if secret_name == &env_var {
                continue;
            }
            match env_var_value(secret_name) {
                Some(value) => {
                    let header = header_name_for_secret(provider_id, secret_name);
                    headers.insert(header, value);
                }
                None => missing.push(secret_name.clone()),
            }
        }

        ResolvedCredentials {
            headers,
            query: HashMap::new(),
            is_valid: missing.is_empty(),
            missing_credentials: missing,
        }
    }

    pub fn validate(&self, provider_id: &str, auth_config: Option<&AuthConfig>) -> (bool, Vec<String>) {
        let resolved = self.resolve(provider_id, auth_config);
        (resolved.is_valid, resolved.missing_credentials)
    }

    /// `getMaskedCredentials`: one masked entry per environment variable
    /// this resolver would consult for `provider_id`, for display in admin
    /// surfaces. Never returns a raw secret.
    pub fn masked_credentials(
        &self,
        provider_id: &str,
        auth_config: Option<&AuthConfig>,
    ) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let primary_env_var = auth_config
            .and_then(|c| c.env_var_name.clone())
            .unwrap_or_else(|| default_api_key_env_var(provider_id));
        out.insert(
            primary_env_var.clone(),
            mask_credential_display(std::env::var(&primary_env_var).ok().as_deref()),
        );
        if let Some(cfg) = auth_config {
            for secret_name in &cfg.required_secrets {
                if secret_name == &primary_env_var {
                    continue;
                }
                out.insert(
                    secret_name.clone(),
                    mask_credential_display(std::env::var(secret_name).ok().as_deref()),
                );
            }
        }
        out
    }
}

fn env_var_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// `DEBUG_PROVIDER_AUTH` (spec §6) turns on verbose, masked logging of
/// credential resolution for diagnosing auth misconfiguration.
fn debug_provider_auth_enabled() -> bool {
    std::env::var("DEBUG_PROVIDER_AUTH")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn mask_credential_display_map(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), mask_credential_display(Some(v.as_str()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_convention_without_auth_config() {
        std::env::set_var("TESTPROVIDER_API_KEY", "sk-testsecretvalue123456789");
        let resolver = CredentialsResolver::new();
        let resolved = resolver.resolve("testprovider", None);
        assert!(resolved.is_valid);
        assert_eq!(
            resolved.headers.get("Authorization").unwrap(),
            "Bearer sk-testsecretvalue123456789"
        );
        std::env::remove_var("TESTPROVIDER_API_KEY");
    }

    #[test]
    fn missing_primary_env_var_reports_missing() {
        std::env::remove_var("NOPE_PROVIDER_API_KEY");
        let resolver = CredentialsResolver::new();
        let resolved = resolver.resolve("nope-provider-missing-xyz", None);
        assert!(!resolved.is_valid);
        assert_eq!(resolved.missing_credentials.len(), 1);
    }

    #[test]
    fn scheme_and_header_name_from_auth_config() {
        std::env::set_var("CUSTOM_KEY_ENV", "abc123secretvalue");
        let cfg = AuthConfig {
            header_name: "X-Api-Key".to_string(),
            scheme: None,
            env_var_name: Some("CUSTOM_KEY_ENV".to_string()),
            required_secrets: vec![],
        };
        let resolver = CredentialsResolver::new();
        let resolved = resolver.resolve("custom-provider-scheme-test", Some(&cfg));
        assert!(resolved.is_valid);
        assert_eq!(resolved.headers.get("X-Api-Key").unwrap(), "abc123secretvalue");
        std::env::remove_var("CUSTOM_KEY_ENV");
    }

    #[test]
    fn required_secrets_map_to_fixed_headers() {
        std::env::set_var("REQSEC_API_KEY", "key-value-longer-than-eight");
        std::env::set_var("ORGANIZATION_ID", "org-123");
        let cfg = AuthConfig {
            header_name: "Authorization".to_string(),
            scheme: Some("Bearer".to_string()),
            env_var_name: None,
            required_secrets: vec!["ORGANIZATION_ID".to_string()],
        };
        let resolver = CredentialsResolver::new();
        let resolved = resolver.resolve("reqsec", Some(&cfg));
        assert!(resolved.is_valid);
        assert_eq!(resolved.headers.get("OpenAI-Organization").unwrap(), "org-123");
        std::env::remove_var("REQSEC_API_KEY");
        std::env::remove_var("ORGANIZATION_ID");
    }
}
