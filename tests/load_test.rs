//! Load tests: one invoker shared by many concurrent callers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outbound_guard::config::{GuardConfig, RateLimitConfig};
use outbound_guard::{RequestDescriptor, ResilientInvoker};
use tokio::time::Instant;

mod common;
use common::{fast_config, service, start_programmable_backend, MockResponse};

#[tokio::test(start_paused = true)]
async fn test_permits_bounded_under_contention() {
    let config = GuardConfig {
        rate_limit: RateLimitConfig {
            enabled: true,
            requests_per_second: 20.0,
            burst_size: 10,
        },
        ..fast_config()
    };
    let invoker: Arc<ResilientInvoker<u32>> =
        Arc::new(ResilientInvoker::new("load", &config).unwrap());
    let start = Instant::now();
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let tasks: Vec<_> = (0..100u32)
        .map(|i| {
            let invoker = invoker.clone();
            let stamps = stamps.clone();
            tokio::spawn(async move {
                let request = RequestDescriptor::write("load").part(i);
                invoker
                    .execute(&request, || {
                        let stamps = stamps.clone();
                        async move {
                            stamps.lock().unwrap().push(Instant::now());
                            Ok(i)
                        }
                    })
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 100);
    // burst plus refill bounds every window measured from the start
    for window_secs in 1..=4u64 {
        let window = Duration::from_secs(window_secs);
        let within = stamps
            .iter()
            .filter(|t| t.duration_since(start) < window)
            .count();
        assert!(
            within <= 10 + 20 * window_secs as usize,
            "{} calls within {:?}",
            within,
            window
        );
    }
    // 90 calls beyond the burst need at least 4.5s of refill
    assert!(start.elapsed() >= Duration::from_millis(4490));
    assert_eq!(invoker.audit_stats().retained, 100 + 90);
}

#[tokio::test]
async fn test_shared_client_against_backend() {
    let backend = start_programmable_backend(|n, _| {
        if n == 4 || n == 9 {
            MockResponse::json(503, "")
        } else {
            MockResponse::json(200, r#"{"ok":true}"#)
        }
    })
    .await;
    let config = GuardConfig {
        rate_limit: RateLimitConfig {
            enabled: true,
            requests_per_second: 100.0,
            burst_size: 10,
        },
        ..fast_config()
    };
    let invoker = Arc::new(ResilientInvoker::new("load", &config).unwrap());
    let client = outbound_guard::clients::RestClient::new(
        &service("svc", backend.url()),
        &config.timeouts,
        invoker.clone(),
    )
    .unwrap();

    let succeeded = Arc::new(AtomicU32::new(0));
    let started = std::time::Instant::now();
    let tasks: Vec<_> = (0..40)
        .map(|_| {
            let client = client.clone();
            let succeeded = succeeded.clone();
            tokio::spawn(async move {
                if client.post("jobs", &serde_json::json!({})).await.is_ok() {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // two injected failures, each retried
    assert_eq!(succeeded.load(Ordering::SeqCst), 40);
    assert!(backend.call_count() >= 40);
    // 30 calls beyond the burst at 100/s
    assert!(started.elapsed() >= Duration::from_millis(250));
}
