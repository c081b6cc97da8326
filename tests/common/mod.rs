//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use outbound_guard::config::{
    CacheConfig, GuardConfig, RateLimitConfig, RetryConfig, ServiceConfig,
};
use outbound_guard::resilience::BackoffStrategy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock backend saw.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A running mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub calls: Arc<AtomicU32>,
    pub requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable mock backend on an ephemeral port. `f` receives the
/// zero-based call number and the parsed request.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(u32, &MockRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    {
        let calls = calls.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let f = f.clone();
                let calls = calls.clone();
                let requests = requests.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, f, calls, requests).await;
                });
            }
        });
    }

    MockBackend {
        addr,
        calls,
        requests,
    }
}

async fn serve<F>(
    mut socket: TcpStream,
    f: Arc<F>,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
) -> std::io::Result<()>
where
    F: Fn(u32, &MockRequest) -> MockResponse,
{
    let request = read_request(&mut socket).await?;
    let n = calls.fetch_add(1, Ordering::SeqCst);
    let response = f(n, &request);
    requests.lock().unwrap().push(request);

    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
    for (name, value) in &response.headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.body.len(),
        response.body
    ));
    socket.write_all(out.as_bytes()).await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let mut authorization = None;
    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "authorization" => authorization = Some(value),
                "content-length" => content_length = value.parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    let mut body = buf[head_end.min(buf.len())..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Ok(MockRequest {
        method,
        path,
        authorization,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Guard configuration with short delays for real-time tests.
pub fn fast_config() -> GuardConfig {
    GuardConfig {
        rate_limit: RateLimitConfig {
            enabled: true,
            requests_per_second: 1000.0,
            burst_size: 100,
        },
        cache: CacheConfig {
            enabled: true,
            ttl_secs: 60,
            max_entries: 100,
        },
        retries: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            strategy: BackoffStrategy::Exponential,
            jitter: false,
            retryable_statuses: vec![500, 502, 503, 504],
            max_retry_after_secs: 300,
        },
        ..GuardConfig::default()
    }
}

pub fn service(name: &str, base_url: String) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        base_url,
        api_key_env: None,
    }
}
