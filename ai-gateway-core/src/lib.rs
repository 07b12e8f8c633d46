//! # AI Provider Proxy Core
//!
//! The library half of the AI gateway's configuration service: given a
//! logical operation request, select a provider, render a provider-specific
//! HTTP request from a database-driven template, attach credentials,
//! invoke the provider with resiliency (timeouts, retries, circuit
//! breaking), and normalize the response.
//!
//! ## Module map
//!
//! - [`models`] — the shared data model: provider configuration, templates,
//!   cache entries, health/circuit-breaker state, metrics, the external
//!   request/response envelope.
//! - [`credentials`] — composes auth headers/query parameters from
//!   environment variables and a provider's `authConfig`.
//! - [`engine`] — turns `(configuration, logical request, credentials)`
//!   into a concrete HTTP call and back into normalized content.
//! - [`circuit_breaker`] — per-provider closed/open/half-open state
//!   machine.
//! - [`repository`] — the provider configuration persistence contract.
//! - [`cache`] — the two-tier TTL/LRU cache backing template execution.
//! - [`template`] — renders a stored prompt template against a variable
//!   map.
//! - [`metrics`] — per-provider counters and rate-limit header parsing.
//! - [`music`] — the music-generation long-poll workflow with early
//!   playback.
//! - [`proxy`] — [`proxy::ProviderProxy`], the single entry point for
//!   provider invocation, tying every module above together.
//!
//! ## Quick start
//!
//! ```no_run
//! use ai_gateway_core::metrics::MetricsCollector;
//! use ai_gateway_core::proxy::ProviderProxy;
//! use ai_gateway_core::repository::InMemoryProviderConfigRepository;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(InMemoryProviderConfigRepository::new());
//! let metrics = Arc::new(MetricsCollector::noop());
//! let proxy = Arc::new(ProviderProxy::new(repository, metrics));
//! // proxy.invoke(request).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod common;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod music;
pub mod proxy;
pub mod repository;
pub mod template;

pub use error::{ProviderError, ProxyError, ProxyErrorKind};
pub use proxy::ProviderProxy;

/// Convenience result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
