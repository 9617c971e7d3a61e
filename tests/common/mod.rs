//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use audit_proxy::audit::{AuditPublisher, ChannelSink, Delivery};
use audit_proxy::{HttpServer, ProxyConfig, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// What the mock backend saw.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Start a programmable raw-TCP backend on an ephemeral port.
pub async fn start_backend<F>(respond: F) -> (SocketAddr, mpsc::UnboundedReceiver<ReceivedRequest>)
where
    F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let respond = respond.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                handle_connection(socket, respond.as_ref(), tx).await;
            });
        }
    });

    (addr, rx)
}

/// Start a backend that always returns the same JSON body.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_backend(move |_| MockResponse::json(body)).await.0
}

async fn handle_connection<F>(
    mut socket: TcpStream,
    respond: &F,
    tx: mpsc::UnboundedSender<ReceivedRequest>,
) where
    F: Fn(&ReceivedRequest) -> MockResponse,
{
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let response = respond(&request);
    let _ = tx.send(request);

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&response.body).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(ReceivedRequest {
        request_line,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// Baseline config pointing at `target`.
pub fn proxy_config(target: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.target.url = target.to_string();
    config
}

/// A running proxy plus the handles to observe and stop it.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Next published record, parsed, with its key.
    pub async fn next_record(&mut self) -> (String, serde_json::Value) {
        let rx = self.deliveries.as_mut().expect("audit not enabled");
        let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no record published")
            .expect("sink closed");
        let value = serde_json::from_slice(&delivery.payload).unwrap();
        (delivery.key, value)
    }

    /// Assert nothing is published within a short window.
    pub async fn assert_no_record(&mut self) {
        let rx = self.deliveries.as_mut().expect("audit not enabled");
        let next = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(next.is_err(), "unexpected record: {:?}", next);
    }
}

/// Start a proxy; when `audit` is set, records go to an in-process channel.
pub async fn start_proxy(config: ProxyConfig, audit: bool) -> TestProxy {
    let (publisher, deliveries) = if audit {
        let (sink, rx) = ChannelSink::new();
        let (publisher, _workers) = AuditPublisher::start(Arc::new(sink), 1024, 2);
        (Some(publisher), Some(rx))
    } else {
        (None, None)
    };

    let server = HttpServer::new(Arc::new(config), publisher).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestProxy {
        addr,
        shutdown,
        deliveries,
    }
}

/// Client that never pools or proxies, so every test sees fresh connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
