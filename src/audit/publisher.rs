//! Asynchronous audit publishing.
//!
//! # Responsibilities
//! - Accept records from request handlers without blocking them
//! - Normalize captured exchanges into records off the response path
//! - Serialize and deliver records on a fixed pool of workers
//! - Drain queued records on shutdown, bounded by a grace period
//!
//! # Design Decisions
//! - The queue is bounded; when it is full the newest record is dropped
//!   and counted, so a slow bus never slows the proxy
//! - Delivery failures are logged and counted, never retried
//! - Gunzip and JSON validation run on the blocking pool, so large bodies
//!   never stall the async workers
//! - Workers exit once every [`AuditPublisher`] handle is gone and the
//!   queue is empty
//!
//! # Data Flow
//! ```text
//! handler → publish_exchange() → try_send → [bounded queue]
//!     → worker N → spawn_blocking(into_record) → sink.deliver()
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::audit::record::{AuditRecord, Exchange};
use crate::audit::sink::AuditSink;
use crate::capture::response::CapturedResponse;
use crate::observability::metrics;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Pending>>>;

/// Queue entry: a finished record, or an exchange still to be normalized.
enum Pending {
    Record(AuditRecord),
    Captured(Exchange, CapturedResponse),
}

impl Pending {
    fn method(&self) -> &str {
        match self {
            Pending::Record(record) => &record.method,
            Pending::Captured(exchange, _) => exchange.method.as_str(),
        }
    }

    fn path(&self) -> &str {
        match self {
            Pending::Record(record) => &record.path,
            Pending::Captured(exchange, _) => &exchange.path,
        }
    }
}

/// Cheap, cloneable handle for enqueueing audit records.
#[derive(Clone)]
pub struct AuditPublisher {
    tx: mpsc::Sender<Pending>,
}

/// Join handles of the delivery workers.
pub struct PublisherWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl AuditPublisher {
    /// Spawn `workers` delivery tasks over a queue of `capacity` records.
    pub fn start(
        sink: Arc<dyn AuditSink>,
        capacity: usize,
        workers: usize,
    ) -> (Self, PublisherWorkers) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let sink = sink.clone();
                tokio::spawn(run_worker(worker, rx, sink))
            })
            .collect();

        tracing::info!(capacity, workers, "Audit publisher started");

        (Self { tx }, PublisherWorkers { handles })
    }

    /// Enqueue a record. Returns `false` if it was dropped.
    pub fn publish(&self, record: AuditRecord) -> bool {
        self.enqueue(Pending::Record(record))
    }

    /// Enqueue a captured exchange; a worker turns it into a record.
    /// Returns `false` if it was dropped.
    pub fn publish_exchange(&self, exchange: Exchange, captured: CapturedResponse) -> bool {
        self.enqueue(Pending::Captured(exchange, captured))
    }

    fn enqueue(&self, pending: Pending) -> bool {
        match self.tx.try_send(pending) {
            Ok(()) => {
                metrics::record_audit_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(pending)) => {
                metrics::record_audit_dropped("full");
                tracing::warn!(
                    method = %pending.method(),
                    path = %pending.path(),
                    "Audit queue full, dropping record"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(pending)) => {
                metrics::record_audit_dropped("closed");
                tracing::warn!(
                    method = %pending.method(),
                    path = %pending.path(),
                    "Audit publisher closed, dropping record"
                );
                false
            }
        }
    }
}

impl PublisherWorkers {
    /// Wait for the workers to drain the queue.
    ///
    /// Only completes once every [`AuditPublisher`] clone has been dropped.
    /// Workers still running after `grace` are aborted.
    pub async fn shutdown(self, grace: Duration) {
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(grace, join_all(self.handles)).await {
            Ok(_) => tracing::info!("Audit publisher drained"),
            Err(_) => {
                tracing::warn!(grace = ?grace, "Audit publisher did not drain in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn run_worker(worker: usize, rx: SharedReceiver, sink: Arc<dyn AuditSink>) {
    loop {
        let next = rx.lock().await.recv().await;
        let record = match next {
            None => break,
            Some(Pending::Record(record)) => record,
            Some(Pending::Captured(exchange, captured)) => {
                match tokio::task::spawn_blocking(move || exchange.into_record(captured)).await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!(worker, error = %e, "Failed to build audit record");
                        metrics::record_publish_failure();
                        continue;
                    }
                }
            }
        };

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(worker, error = %e, "Failed to serialize audit record");
                metrics::record_publish_failure();
                continue;
            }
        };

        match sink.deliver(record.publish_key(), payload).await {
            Ok(()) => metrics::record_audit_published(),
            Err(e) => {
                metrics::record_publish_failure();
                tracing::error!(
                    worker,
                    method = %record.method,
                    path = %record.path,
                    error = %e,
                    "Failed to publish audit record"
                );
            }
        }
    }
    tracing::debug!(worker, "Audit worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::{ChannelSink, PublishError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(path: &str, correlation_id: Option<&str>) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            method: "GET".into(),
            path: path.into(),
            query: String::new(),
            request_body: None,
            response_status: 200,
            response_body: None,
            correlation_id: correlation_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn delivers_keyed_json() {
        let (sink, mut rx) = ChannelSink::new();
        let (publisher, workers) = AuditPublisher::start(Arc::new(sink), 8, 2);

        assert!(publisher.publish(record("/a", Some("sess-1"))));
        assert!(publisher.publish(record("/b", None)));

        let mut keys = vec![rx.recv().await.unwrap().key, rx.recv().await.unwrap().key];
        keys.sort();
        assert_eq!(keys, vec!["GET /b".to_string(), "sess-1".to_string()]);

        drop(publisher);
        workers.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn payload_is_the_record_json() {
        let (sink, mut rx) = ChannelSink::new();
        let (publisher, _workers) = AuditPublisher::start(Arc::new(sink), 8, 1);
        publisher.publish(record("/x", None));

        let delivery = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(value["path"], "/x");
        assert_eq!(value["rep_status"], 200);
        assert!(value["req_body"].is_null());
    }

    #[tokio::test]
    async fn captured_exchange_is_normalized_by_worker() {
        use axum::http::{Method, StatusCode};
        use bytes::Bytes;
        use std::io::Write;

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(br#"{"items":[1,2]}"#).unwrap();
        let gzipped = Bytes::from(encoder.finish().unwrap());

        let (sink, mut rx) = ChannelSink::new();
        let (publisher, workers) = AuditPublisher::start(Arc::new(sink), 8, 1);

        let exchange = Exchange {
            method: Method::GET,
            path: "/items".into(),
            query: String::new(),
            request_body: Bytes::new(),
            correlation_id: None,
        };
        let captured = CapturedResponse {
            status: StatusCode::OK,
            gzip: true,
            body: gzipped,
        };
        assert!(publisher.publish_exchange(exchange, captured));

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.key, "GET /items");
        let value: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(value["rep_body"]["items"][1], 2);

        drop(publisher);
        workers.shutdown(Duration::from_secs(1)).await;
    }

    struct BlockedSink {
        release: tokio::sync::Notify,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for BlockedSink {
        async fn deliver(&self, _key: String, _payload: Vec<u8>) -> Result<(), PublishError> {
            self.release.notified().await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let sink = Arc::new(BlockedSink {
            release: tokio::sync::Notify::new(),
            delivered: AtomicUsize::new(0),
        });
        let (publisher, _workers) = AuditPublisher::start(sink.clone(), 1, 1);

        // The worker takes the first record and blocks in deliver.
        assert!(publisher.publish(record("/1", None)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(publisher.publish(record("/2", None)));
        assert!(!publisher.publish(record("/3", None)));
    }

    struct FailingSink(AtomicUsize);

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn deliver(&self, _key: String, _payload: Vec<u8>) -> Result<(), PublishError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(PublishError::Closed)
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_workers() {
        let sink = Arc::new(FailingSink(AtomicUsize::new(0)));
        let (publisher, workers) = AuditPublisher::start(sink.clone(), 8, 1);

        for i in 0..3 {
            publisher.publish(record(&format!("/{i}"), None));
        }
        drop(publisher);
        workers.shutdown(Duration::from_secs(1)).await;

        assert_eq!(sink.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_aborts_stuck_workers() {
        let sink = Arc::new(BlockedSink {
            release: tokio::sync::Notify::new(),
            delivered: AtomicUsize::new(0),
        });
        let (publisher, workers) = AuditPublisher::start(sink.clone(), 4, 1);
        publisher.publish(record("/stuck", None));
        drop(publisher);

        let started = std::time::Instant::now();
        workers.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);
    }
}
