//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing)
//!     → middleware/ (CORS, session, audit)
//!     → forward.rs (rewrite request, call upstream, stream response)
//!     → headers.rs (hop-by-hop, X-Forwarded-*, cookie domains)
//!     → Send to client
//! ```

pub mod forward;
pub mod headers;
pub mod middleware;
pub mod server;

pub use forward::{ForwardError, Forwarder, UpstreamFailure};
pub use middleware::CorrelationId;
pub use server::{build_router, HttpServer};
