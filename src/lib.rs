//! Auditing reverse proxy library.

pub mod audit;
pub mod capture;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use audit::{AuditPublisher, AuditRecord};
pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
