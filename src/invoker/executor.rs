//! The resilient invoker: cache, rate limit, retry and audit around one
//! caller-supplied remote call.
//!
//! # State machine of one `execute`
//! ```text
//! Start → CacheCheck ─hit──────────────────────────────────────→ Done
//!            └─miss→ RateWait → Invoke ─ok→ Store → Done
//!                       ↑          └─err→ RetryDecision ─terminal→ Fail
//!                       └──────────────── retry (after delay) ←┘
//! ```
//!
//! Suspension happens only while waiting for a permit, between attempts,
//! during the remote call itself and while following another caller's call.
//! Each of those observes the caller's cancellation token, the invoker's
//! shutdown token and the call deadline.
//!
//! Concurrent cacheable reads with the same key share one flight: the first
//! caller runs the attempt loop, the others wait for its outcome. A follower
//! whose leader was cancelled starts over and may lead the next flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditFilter, AuditLog, AuditOutcome, AuditQuery, AuditStats};
use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::config::validation::{
    validate_audit, validate_cache, validate_config, validate_rate_limit, validate_retries,
};
use crate::config::{
    AuditConfig, CacheConfig, ConfigError, GuardConfig, RateLimitConfig, RetryConfig,
};
use crate::error::{FailureKind, InvokeError, InvokeResult, RemoteFailure};
use crate::invoker::request::RequestDescriptor;
use crate::observability::metrics;
use crate::resilience::{
    Deadline, GiveUpReason, RateLimitStatus, RetryDecision, RetryPolicy, TokenBucket,
};

/// Why a suspension ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Deadline,
}

/// Outcome published by a flight leader; `None` until it settles.
type FlightOutcome<V> = Option<InvokeResult<V>>;

struct InFlight<V> {
    id: u64,
    outcome: watch::Receiver<FlightOutcome<V>>,
}

enum Flight<'a, V> {
    Leader(FlightGuard<'a, V>),
    Follower(watch::Receiver<FlightOutcome<V>>),
}

/// Held by the caller that runs the remote call for a key. Dropping it
/// without completing (cancelled future, panic) frees the key and wakes the
/// followers with a closed channel.
struct FlightGuard<'a, V> {
    flights: &'a Mutex<HashMap<CacheKey, InFlight<V>>>,
    key: CacheKey,
    id: u64,
    outcome: watch::Sender<FlightOutcome<V>>,
}

impl<V> FlightGuard<'_, V> {
    fn release(&self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

impl<V: Clone> FlightGuard<'_, V> {
    /// Free the key, then publish. The value is already cached by then, so a
    /// caller arriving after the release finds it there.
    fn complete(self, result: &InvokeResult<V>) {
        self.release();
        self.outcome.send_replace(Some(result.clone()));
    }
}

impl<V> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns one token bucket, one cache, one retry policy and one audit log, and
/// coordinates every mutation of them.
///
/// Share it between service clients with `Arc` to enforce a combined budget.
pub struct ResilientInvoker<V = serde_json::Value> {
    name: String,
    bucket: TokenBucket,
    cache: ResponseCache<V>,
    retry: ArcSwap<RetryPolicy>,
    audit: AuditLog,
    call_budget: ArcSwapOption<Duration>,
    shutdown: CancellationToken,
    flights: Mutex<HashMap<CacheKey, InFlight<V>>>,
    next_flight: AtomicU64,
}

impl<V> ResilientInvoker<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build an invoker from a validated configuration.
    pub fn new(name: impl Into<String>, config: &GuardConfig) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        let name = name.into();

        tracing::info!(
            invoker = %name,
            requests_per_second = config.rate_limit.requests_per_second,
            burst_size = config.rate_limit.burst_size,
            cache_enabled = config.cache.enabled,
            max_attempts = config.retries.max_attempts,
            "Resilient invoker created"
        );

        Ok(Self {
            name,
            bucket: TokenBucket::from_config(&config.rate_limit),
            cache: ResponseCache::from_config(&config.cache),
            retry: ArcSwap::from_pointee(RetryPolicy::from_config(&config.retries)),
            audit: AuditLog::new(&config.audit),
            call_budget: ArcSwapOption::new(config.timeouts.call_budget().map(Arc::new)),
            shutdown: CancellationToken::new(),
            flights: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        })
    }

    /// Tie the invoker to an external shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `remote_call` with caching, rate limiting, retries and auditing.
    pub async fn execute<F, Fut>(&self, request: &RequestDescriptor, remote_call: F) -> InvokeResult<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, RemoteFailure>>,
    {
        self.execute_with_cancel(request, &CancellationToken::new(), remote_call)
            .await
    }

    /// [`execute`](Self::execute) that also stops when `cancel` fires.
    pub async fn execute_with_cancel<F, Fut>(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        remote_call: F,
    ) -> InvokeResult<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, RemoteFailure>>,
    {
        if let Err(err) = self.check_request(request) {
            self.record_terminal(request, None, &err);
            return Err(err);
        }

        let deadline = Deadline::new(request.timeout.or_else(|| self.call_budget()));
        if !(request.cacheable && self.cache.is_enabled()) {
            return self
                .run_attempts(request, cancel, None, &deadline, remote_call)
                .await;
        }

        let key = request.cache_key();
        let flight = loop {
            match self.join_flight(&key) {
                Flight::Leader(guard) => {
                    // dropping the guard on a hit frees the key again
                    if let Some(value) = self.cache.get(&key) {
                        self.record_cache_hit(request, &key, false);
                        return Ok(value);
                    }
                    metrics::record_cache_lookup(&request.operation, false);
                    break guard;
                }
                Flight::Follower(outcome) => {
                    match self.follow_flight(outcome, cancel, &deadline).await {
                        Err(interrupt) => {
                            return Err(self.interrupt_error(request, None, interrupt, &deadline));
                        }
                        Ok(Some(Ok(value))) => {
                            self.record_cache_hit(request, &key, true);
                            return Ok(value);
                        }
                        Ok(Some(Err(err))) if !err.is_cancelled() => {
                            self.record_terminal(request, None, &err);
                            return Err(err);
                        }
                        // leader cancelled or dropped; start over
                        Ok(_) => continue,
                    }
                }
            }
        };

        let result = self
            .run_attempts(request, cancel, Some(&key), &deadline, remote_call)
            .await;
        flight.complete(&result);
        result
    }

    fn join_flight(&self, key: &CacheKey) -> Flight<'_, V> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get(key) {
            return Flight::Follower(flight.outcome.clone());
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), InFlight { id, outcome: rx });
        Flight::Leader(FlightGuard {
            flights: &self.flights,
            key: key.clone(),
            id,
            outcome: tx,
        })
    }

    /// `Ok(None)` means the leader went away without publishing.
    async fn follow_flight(
        &self,
        mut outcome: watch::Receiver<FlightOutcome<V>>,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<FlightOutcome<V>, Interrupt> {
        tokio::select! {
            biased;
            interrupt = self.interrupted(cancel, deadline) => Err(interrupt),
            settled = outcome.wait_for(Option::is_some) => {
                Ok(settled.ok().and_then(|result| result.clone()))
            }
        }
    }

    fn record_cache_hit(&self, request: &RequestDescriptor, key: &CacheKey, coalesced: bool) {
        let operation = request.operation.as_str();
        metrics::record_cache_lookup(operation, true);
        self.audit.append(
            operation,
            AuditOutcome::CacheHit,
            None,
            json!({ "key": key.as_str(), "coalesced": coalesced }),
        );
        tracing::debug!(invoker = %self.name, operation, coalesced, "Served from cache");
    }

    async fn run_attempts<F, Fut>(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        key: Option<&CacheKey>,
        deadline: &Deadline,
        mut remote_call: F,
    ) -> InvokeResult<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, RemoteFailure>>,
    {
        let operation = request.operation.as_str();
        // one snapshot per call; reconfiguration applies to later calls
        let policy = self.retry.load_full();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.wait_for_permit(request, attempt, cancel, deadline).await?;

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                interrupt = self.interrupted(cancel, deadline) => Err(interrupt),
                result = remote_call() => Ok(result),
            };
            let elapsed = started.elapsed();

            let failure = match outcome {
                Err(interrupt) => {
                    return Err(self.interrupt_error(request, Some(attempt), interrupt, deadline));
                }
                Ok(Ok(value)) => {
                    metrics::record_attempt(operation, "success", elapsed);
                    self.store(request, key, &value);
                    self.audit.append(
                        operation,
                        AuditOutcome::Success,
                        Some(attempt),
                        json!({
                            "duration_ms": elapsed.as_millis() as u64,
                            "cached": key.is_some(),
                        }),
                    );
                    tracing::debug!(invoker = %self.name, operation, attempt, "Remote call succeeded");
                    return Ok(value);
                }
                Ok(Err(failure)) => failure,
            };

            metrics::record_attempt(operation, failure.kind.as_str(), elapsed);
            match policy.should_retry(attempt, &failure) {
                RetryDecision::Retry(delay) => {
                    let delay = self.retry_delay(request, &failure, delay);
                    if !deadline.allows(delay) {
                        return Err(self.interrupt_error(
                            request,
                            Some(attempt),
                            Interrupt::Deadline,
                            deadline,
                        ));
                    }

                    self.audit.append(
                        operation,
                        AuditOutcome::Failure,
                        Some(attempt),
                        json!({
                            "terminal": false,
                            "kind": failure.kind,
                            "status": failure.status,
                            "message": failure.message,
                            "delay_ms": delay.as_millis() as u64,
                        }),
                    );
                    tracing::info!(
                        invoker = %self.name,
                        operation,
                        attempt,
                        delay = ?delay,
                        error = %failure,
                        "Retrying remote call"
                    );

                    self.suspend(delay, cancel, deadline)
                        .await
                        .map_err(|i| self.interrupt_error(request, Some(attempt), i, deadline))?;
                }
                RetryDecision::GiveUp(reason) => {
                    let err = match reason {
                        GiveUpReason::Terminal => InvokeError::Terminal {
                            operation: operation.to_string(),
                            source: failure,
                        },
                        GiveUpReason::Exhausted => InvokeError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: failure,
                        },
                    };
                    self.record_terminal(request, Some(attempt), &err);
                    return Err(err);
                }
            }
        }
    }

    fn check_request(&self, request: &RequestDescriptor) -> InvokeResult<()> {
        request.validate()?;
        let status = self.bucket.status();
        if status.enabled && f64::from(request.cost) > status.capacity {
            return Err(InvokeError::Validation(format!(
                "'{}' costs {} permits but the burst capacity is {}",
                request.operation, request.cost, status.capacity
            )));
        }
        Ok(())
    }

    fn call_budget(&self) -> Option<Duration> {
        self.call_budget.load_full().map(|budget| *budget)
    }

    fn store(&self, request: &RequestDescriptor, key: Option<&CacheKey>, value: &V) {
        if let Some(key) = key {
            let ttl = request.ttl.unwrap_or_else(|| self.cache.default_ttl());
            self.cache.put(key.clone(), value.clone(), ttl);
        }
    }

    /// A provider that said "slow down" without saying how long is answered
    /// with the bucket's own estimate, falling back to the policy delay.
    fn retry_delay(
        &self,
        request: &RequestDescriptor,
        failure: &RemoteFailure,
        policy_delay: Duration,
    ) -> Duration {
        if failure.kind != FailureKind::RateLimited || failure.retry_after.is_some() {
            return policy_delay;
        }
        let suggested = self.bucket.suggested_wait(request.cost);
        if suggested.is_zero() {
            policy_delay
        } else {
            suggested
        }
    }

    async fn wait_for_permit(
        &self,
        request: &RequestDescriptor,
        attempt: u32,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> InvokeResult<()> {
        let operation = request.operation.as_str();
        let mut waited = Duration::ZERO;
        let mut audited = false;

        loop {
            // registered before the check so a reconfiguration in between is not missed
            let changed = self.bucket.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let wait = self.bucket.acquire(request.cost);
            if wait.is_zero() {
                if audited {
                    tracing::debug!(invoker = %self.name, operation, waited = ?waited, "Permit granted after wait");
                }
                return Ok(());
            }

            if !deadline.allows(wait) {
                let err = InvokeError::RateLimited {
                    operation: operation.to_string(),
                    retry_after: wait,
                };
                self.audit.append(
                    operation,
                    AuditOutcome::RateLimited,
                    Some(attempt),
                    json!({ "wait_ms": wait.as_millis() as u64, "terminal": true }),
                );
                self.record_terminal(request, Some(attempt), &err);
                return Err(err);
            }

            if !audited {
                audited = true;
                self.audit.append(
                    operation,
                    AuditOutcome::RateLimited,
                    Some(attempt),
                    json!({ "wait_ms": wait.as_millis() as u64, "terminal": false }),
                );
            }
            metrics::record_rate_limit_wait(operation, wait);
            let started = Instant::now();

            tokio::select! {
                biased;
                interrupt = self.interrupted(cancel, deadline) => {
                    return Err(self.interrupt_error(request, Some(attempt), interrupt, deadline));
                }
                _ = &mut changed => {
                    tracing::debug!(invoker = %self.name, operation, "Rate limit changed, re-checking permit");
                    // a shrunken burst can make the request unsatisfiable
                    if let Err(err) = self.check_request(request) {
                        self.record_terminal(request, Some(attempt), &err);
                        return Err(err);
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
            waited += started.elapsed();
        }
    }

    /// Resolves when the call has to stop.
    async fn interrupted(&self, cancel: &CancellationToken, deadline: &Deadline) -> Interrupt {
        let expiry = async {
            match deadline.expires_at() {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Interrupt::Cancelled,
            _ = self.shutdown.cancelled() => Interrupt::Cancelled,
            _ = expiry => Interrupt::Deadline,
        }
    }

    async fn suspend(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<(), Interrupt> {
        tokio::select! {
            biased;
            interrupt = self.interrupted(cancel, deadline) => Err(interrupt),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    fn interrupt_error(
        &self,
        request: &RequestDescriptor,
        attempt: Option<u32>,
        interrupt: Interrupt,
        deadline: &Deadline,
    ) -> InvokeError {
        let operation = request.operation.clone();
        let err = match interrupt {
            Interrupt::Cancelled => InvokeError::Cancelled { operation },
            Interrupt::Deadline => InvokeError::DeadlineExceeded {
                operation,
                budget: deadline.budget().unwrap_or_default(),
            },
        };
        self.record_terminal(request, attempt, &err);
        err
    }

    /// Every failed `execute` ends here: one terminal audit record, one metric.
    fn record_terminal(&self, request: &RequestDescriptor, attempt: Option<u32>, err: &InvokeError) {
        let operation = request.operation.as_str();
        let root = err.root_failure();
        self.audit.append(
            operation,
            AuditOutcome::Failure,
            attempt,
            json!({
                "terminal": true,
                "error": err.tag(),
                "kind": root.map(|f| f.kind),
                "status": root.and_then(|f| f.status),
                "message": err.to_string(),
            }),
        );
        metrics::record_call_failure(operation, err.tag());

        if err.is_cancelled() {
            tracing::debug!(invoker = %self.name, operation, "Call cancelled");
        } else {
            tracing::warn!(invoker = %self.name, operation, error = %err, "Call failed");
        }
    }

    // ===== Introspection & operations =====

    /// Lazily query the audit trail.
    pub fn audit_logs(&self, filter: AuditFilter) -> AuditQuery {
        self.audit.query(filter)
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.bucket.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        self.retry.load_full()
    }

    pub fn update_rate_limit(&self, config: &RateLimitConfig) -> Result<(), ConfigError> {
        validate_rate_limit(config).map_err(ConfigError::Validation)?;
        self.bucket.apply_config(config);
        Ok(())
    }

    pub fn update_retry_policy(&self, config: &RetryConfig) -> Result<(), ConfigError> {
        validate_retries(config).map_err(ConfigError::Validation)?;
        self.retry.store(Arc::new(RetryPolicy::from_config(config)));
        tracing::info!(
            invoker = %self.name,
            max_attempts = config.max_attempts,
            strategy = ?config.strategy,
            "Retry policy updated"
        );
        Ok(())
    }

    pub fn update_cache_config(&self, config: &CacheConfig) -> Result<(), ConfigError> {
        validate_cache(config).map_err(ConfigError::Validation)?;
        self.cache.reconfigure(config);
        Ok(())
    }

    pub fn update_audit_config(&self, config: &AuditConfig) -> Result<(), ConfigError> {
        validate_audit(config).map_err(ConfigError::Validation)?;
        self.audit.reconfigure(config);
        Ok(())
    }

    pub fn update_call_budget(&self, budget: Option<Duration>) {
        self.call_budget.store(budget.map(Arc::new));
    }

    /// Apply every runtime-adjustable section of `config`, or none of them.
    pub fn apply_config(&self, config: &GuardConfig) -> Result<(), ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        self.bucket.apply_config(&config.rate_limit);
        self.cache.reconfigure(&config.cache);
        self.retry
            .store(Arc::new(RetryPolicy::from_config(&config.retries)));
        self.audit.reconfigure(&config.audit);
        self.update_call_budget(config.timeouts.call_budget());
        tracing::info!(invoker = %self.name, "Configuration applied");
        Ok(())
    }

    /// Apply configurations from a watcher until the channel closes or the
    /// invoker shuts down.
    pub async fn follow_config(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<GuardConfig>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                update = updates.recv() => match update {
                    Some(config) => {
                        if let Err(e) = self.apply_config(&config) {
                            tracing::error!(invoker = %self.name, error = %e, "Rejected configuration update");
                        }
                    }
                    None => break,
                },
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop the cached response for one request, if any.
    pub fn invalidate(&self, request: &RequestDescriptor) -> bool {
        self.cache.invalidate(&request.cache_key())
    }

    /// Cancel every in-flight wait and call. Later calls fail as cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<V> std::fmt::Debug for ResilientInvoker<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
