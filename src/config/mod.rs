//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment / flags (cli.rs)      config file (TOML)
//!              \                      /
//!               → ProxyConfig (schema.rs)
//!               → validation.rs (semantic checks)
//!               → Arc<ProxyConfig> (validated, immutable)
//!               → shared with every subsystem at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no runtime reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde/clap) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::{load_config, ConfigError};
pub use schema::{
    AuditConfig, CorsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    SessionConfig, TargetConfig,
};
pub use validation::{validate_config, ValidationError};
