//! Request pipeline stages.
//!
//! # Data Flow
//! ```text
//! cors.rs (preflight short-circuit)
//!     → session.rs (correlation id extension + cookie)
//!     → audit.rs (filter gate, capture, publish)
//!     → forwarder
//! ```

pub mod audit;
pub mod cors;
pub mod session;

pub use audit::{audit_middleware, AuditState};
pub use cors::cors_layer;
pub use session::{read_cookie, session_middleware, CorrelationId, SessionState};
