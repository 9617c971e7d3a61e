//! Failure injection tests for the audit proxy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use audit_proxy::audit::{AuditPublisher, AuditSink, PublishError};
use audit_proxy::{HttpServer, Shutdown};
use axum::http::StatusCode;
use tokio::net::TcpListener;

mod common;

use common::{client, proxy_config, start_backend, start_proxy, MockResponse};

#[tokio::test]
async fn test_upstream_error_status_is_audited() {
    let (backend, _) = start_backend(|_| MockResponse {
        status: 500,
        headers: vec![("Content-Type".into(), "application/json".into())],
        body: br#"{"error":"boom"}"#.to_vec(),
    })
    .await;
    let mut proxy = start_proxy(proxy_config(&format!("http://{backend}")), true).await;

    let res = client().get(proxy.url("/fail")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let (_, record) = proxy.next_record().await;
    assert_eq!(record["rep_status"], 500);
    assert_eq!(record["rep_body"]["error"], "boom");
}

#[tokio::test]
async fn test_header_timeout_is_502() {
    // Accepts connections but never answers.
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = silent.accept().await {
            held.push(socket);
        }
    });

    let mut config = proxy_config(&format!("http://{silent_addr}"));
    config.target.timeout_ms = 200;
    let mut proxy = start_proxy(config, true).await;

    let started = Instant::now();
    let res = client().get(proxy.url("/slow")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_secs(5));
    proxy.assert_no_record().await;
}

/// A bus that never acknowledges.
struct StalledSink;

#[async_trait]
impl AuditSink for StalledSink {
    async fn deliver(&self, _key: String, _payload: Vec<u8>) -> Result<(), PublishError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_bus_never_slows_clients() {
    let backend = common::start_mock_backend(r#"{"ok":true}"#).await;
    let config = proxy_config(&format!("http://{backend}"));

    // One slot, one worker: the queue is full after two requests.
    let (publisher, _workers) = AuditPublisher::start(Arc::new(StalledSink), 1, 1);
    let server = HttpServer::new(Arc::new(config), Some(publisher)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    let client = client();
    let started = Instant::now();
    for i in 0..20 {
        let res = client
            .get(format!("http://{addr}/item/{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), r#"{"ok":true}"#);
    }
    assert!(started.elapsed() < Duration::from_secs(10));

    shutdown.trigger();
}
