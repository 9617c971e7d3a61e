//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! Request matched by filter.rs
//!     → record.rs (normalize bodies, build AuditRecord)
//!     → publisher.rs (bounded queue, worker pool)
//!     → sink.rs (Kafka topic)
//! ```

pub mod filter;
pub mod publisher;
pub mod record;
pub mod sink;

pub use filter::{matches, normalize_path, parse_filter_rules, FilterRule, FilterRuleError};
pub use publisher::{AuditPublisher, PublisherWorkers};
pub use record::{AuditRecord, Exchange};
pub use sink::{AuditSink, ChannelSink, Delivery, KafkaSink, PublishError};
