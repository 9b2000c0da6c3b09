//! # cordon-policy
//!
//! Engine configuration and notification channels for Cordon.
//!
//! This crate loads the YAML engine configuration (stage timeouts, retry
//! budget, approval expiry, routing threshold) and provides the notifier
//! implementations that deliver decision requests to humans.

pub mod config;
pub mod notifications;

pub use config::{ConfigError, EngineConfig, CONFIG_PATH_ENV};
pub use notifications::{MockNotifier, WebhookNotifier};
