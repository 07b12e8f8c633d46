//! AI Gateway Service Library
//!
//! The composition root for the AI provider proxy: process configuration,
//! CLI argument parsing, logging initialization, and a two-route HTTP
//! surface (`POST /v1/invoke`, `GET /health`) wired to a single shared
//! `ai_gateway_core::ProviderProxy`. Everything else — provider invocation,
//! circuit breaking, credential resolution, response normalization — lives
//! in `ai-gateway-core`; this crate only owns process-level concerns.
//!
//! ## Quick start
//!
//! ```no_run
//! use ai_gateway_service::config::Config;
//!
//! let config = Config::load("config.toml")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod server;

pub use server::create_server;

