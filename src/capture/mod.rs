//! Body capture subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → request.rs (drain body, rebuild request with buffered bytes)
//!     → [forwarder]
//!     → response.rs (tee every body frame into a side buffer)
//!     → normalize.rs (gunzip, validate JSON, null sentinel)
//!     → audit record
//! ```
//!
//! # Design Decisions
//! - Capture never delays or alters what the client receives
//! - Every failure degrades to a `null` body, never to a failed request

pub mod normalize;
pub mod request;
pub mod response;

pub use normalize::{is_gzip_encoded, normalize_json, BodyValidity, NormalizedBody};
pub use request::{buffer_request, read_body, BodyReadError};
pub use response::{CaptureBody, CapturedResponse};
