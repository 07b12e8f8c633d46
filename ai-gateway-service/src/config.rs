//! Configuration Management.
//!
//! Loads the composition root's process configuration from a TOML file,
//! overlays environment variables, and validates the result before a
//! `ProviderProxy` is built from it. The `[[providers]]` array is a
//! declarative seed list consumed once at startup to populate whichever
//! `ProviderConfigRepository` backend is configured; it is not itself the
//! repository (the repository is authoritative at runtime).

use ai_gateway_core::models::{HealthStatus, ProviderConfigRecord, ProviderTypeConfig};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Postgres connection string for `SqlxProviderConfigRepository`. When
    /// absent the composition root falls back to the in-memory repository.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One `[[providers]]` TOML table. Mirrors `ProviderConfigRecord` minus the
/// fields the repository assigns itself (`id`, `created_at`, `updated_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSeed {
    pub provider_id: String,
    pub provider_name: String,
    #[serde(flatten)]
    pub configuration: ProviderTypeConfig,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_cost")]
    pub cost_per_unit: String,
    #[serde(default)]
    pub credit_cost: f64,
}

fn default_true() -> bool {
    true
}

fn default_cost() -> String {
    "0".to_string()
}

impl ProviderSeed {
    pub fn into_record(self) -> ProviderConfigRecord {
        ProviderConfigRecord {
            id: 0,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            configuration: self.configuration,
            is_active: self.is_active,
            is_primary: self.is_primary,
            priority: self.priority,
            cost_per_unit: self.cost_per_unit,
            credit_cost: self.credit_cost,
            health_status: HealthStatus::Unknown,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            created_by: None,
            updated_by: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            database_url: None,
            providers: vec![],
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate_schema()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("GATEWAY_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_PORT: {port_str}"))?;
            if port > 0 {
                self.server.port = port;
            }
        }
        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = Some(url);
            }
        }
        Ok(())
    }

    /// Validate configuration schema and constraints.
    pub fn validate_schema(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        for seed in &self.providers {
            if seed.provider_id.is_empty() {
                return Err(anyhow::anyhow!("provider_id cannot be empty"));
            }
            let endpoint = &seed.configuration.endpoint_config().endpoint;
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "invalid endpoint for provider {}: {}",
                    seed.provider_id,
                    endpoint
                ));
            }
        }
        Ok(())
    }

    /// `DISABLE_HEALTH_CHECKS` (spec §6): when set, the composition root
    /// skips spawning the proxy's periodic health loop.
    pub fn health_checks_disabled() -> bool {
        env::var("DISABLE_HEALTH_CHECKS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate_schema().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate_schema().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("GATEWAY_HOST", "0.0.0.0");
        std::env::set_var("GATEWAY_PORT", "8080");
        std::env::set_var("GATEWAY_LOG_LEVEL", "debug");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "debug");
        std::env::remove_var("GATEWAY_HOST");
        std::env::remove_var("GATEWAY_PORT");
        std::env::remove_var("GATEWAY_LOG_LEVEL");
    }
}
