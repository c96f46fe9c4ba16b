//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast with `CircuitOpen`
//! - Half-Open: one probe call tests whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:      failures within time_window >= threshold
//! Open → Half-Open:   cooldown elapsed (observed lazily on next access)
//! Half-Open → Closed: probe succeeds (failure window cleared)
//! Half-Open → Open:   probe fails (cooldown restarts)
//! any → Open:         force_open(reason)
//! any → Closed:       reset()
//! ```
//!
//! # Design Decisions
//! - Per-target breaker (not global), kept in [`CircuitBreakerRegistry`]
//! - Fail fast in Open state; the wrapped call is never invoked
//! - Single probe in Half-Open, claimed under the state lock
//! - Caller cancellation and deadlines are neither success nor failure

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::context::CallContext;
use crate::error::InvokeError;

/// Breaker state for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Id of the probe currently holding the half-open slot.
    probe: Option<u64>,
    next_probe: u64,
    last_failure: Option<String>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            probe: None,
            next_probe: 0,
            last_failure: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown_remaining(&self, now: Instant, cooldown: Duration) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                cooldown.saturating_sub(now.duration_since(opened_at))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub target: String,
    pub state: CircuitState,
    pub enabled: bool,
    pub recent_failures: usize,
    pub threshold: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub cooldown_remaining_ms: u64,
    pub last_failure: Option<String>,
}

/// Circuit breaker guarding a single target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    config: Arc<ArcSwap<CircuitBreakerConfig>>,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

/// Holds the half-open probe slot. Dropping it without a verdict (caller
/// cancelled, future dropped) frees the slot for the next probe.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    id: u64,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.breaker.lock();
        if st.probe == Some(self.id) {
            st.probe = None;
        }
    }
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_shared_config(target, Arc::new(ArcSwap::from_pointee(config)))
    }

    /// Breaker that reads its settings from a shared, reloadable snapshot.
    pub fn with_shared_config(
        target: impl Into<String>,
        config: Arc<ArcSwap<CircuitBreakerConfig>>,
    ) -> Self {
        Self {
            target: target.into(),
            config,
            state: Mutex::new(BreakerState::new()),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `call` through the breaker.
    ///
    /// Rejects with [`InvokeError::CircuitOpen`] without invoking `call` when
    /// the circuit is open, or half-open with the probe already taken.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, call: F) -> Result<T, InvokeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let config = self.config.load_full();
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !config.enabled {
            let result = call().await;
            self.count_outcome(&result);
            return result;
        }

        let probe = self.try_acquire(ctx, &config)?;
        let result = call().await;

        match &result {
            Ok(_) => self.on_success(ctx, probe.as_ref()),
            Err(error) if error.is_cancellation() => {}
            Err(error) => self.on_failure(ctx, probe.as_ref(), error, &config),
        }
        self.count_outcome(&result);

        result
    }

    fn count_outcome<T>(&self, result: &Result<T, InvokeError>) {
        match result {
            Ok(_) => {
                self.successful_calls.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) if error.is_cancellation() => {}
            Err(_) => {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Open → Half-Open once the cooldown has elapsed.
    fn refresh(&self, st: &mut BreakerState, now: Instant, config: &CircuitBreakerConfig) {
        if st.state == CircuitState::Open
            && st.cooldown_remaining(now, config.cooldown()).is_zero()
        {
            st.state = CircuitState::HalfOpen;
            st.probe = None;
            tracing::info!(target_id = %self.target, "Circuit breaker half-open, allowing probe");
        }
    }

    fn try_acquire(
        &self,
        ctx: &CallContext,
        config: &CircuitBreakerConfig,
    ) -> Result<Option<ProbeGuard<'_>>, InvokeError> {
        let now = Instant::now();
        let mut st = self.lock();
        self.refresh(&mut st, now, config);

        let current = st.state;
        let retry_after = match current {
            CircuitState::Closed => return Ok(None),
            CircuitState::HalfOpen if st.probe.is_none() => {
                let id = st.next_probe;
                st.next_probe = st.next_probe.wrapping_add(1);
                st.probe = Some(id);
                tracing::debug!(
                    request_id = %ctx.request_id,
                    target_id = %self.target,
                    "Probe call admitted"
                );
                return Ok(Some(ProbeGuard { breaker: self, id }));
            }
            CircuitState::HalfOpen => config.cooldown(),
            CircuitState::Open => st.cooldown_remaining(now, config.cooldown()),
        };
        drop(st);

        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            request_id = %ctx.request_id,
            target_id = %self.target,
            retry_after_ms = retry_after.as_millis() as u64,
            "Circuit open, rejecting call"
        );

        Err(InvokeError::CircuitOpen {
            target: self.target.clone(),
            retry_after,
        })
    }

    fn on_success(&self, ctx: &CallContext, probe: Option<&ProbeGuard<'_>>) {
        let mut st = self.lock();
        let is_current_probe = probe.is_some_and(|p| st.probe == Some(p.id));

        if st.state == CircuitState::HalfOpen && is_current_probe {
            st.state = CircuitState::Closed;
            st.failures.clear();
            st.opened_at = None;
            tracing::info!(
                request_id = %ctx.request_id,
                target_id = %self.target,
                "Probe succeeded, circuit closed"
            );
        }
    }

    fn on_failure(
        &self,
        ctx: &CallContext,
        probe: Option<&ProbeGuard<'_>>,
        error: &InvokeError,
        config: &CircuitBreakerConfig,
    ) {
        let now = Instant::now();
        let mut st = self.lock();
        let is_current_probe = probe.is_some_and(|p| st.probe == Some(p.id));

        st.failures.push_back(now);
        st.prune(now, config.time_window());
        st.last_failure = Some(error.to_string());

        let current = st.state;
        match current {
            CircuitState::HalfOpen if is_current_probe => {
                st.state = CircuitState::Open;
                st.opened_at = Some(now);
                tracing::warn!(
                    request_id = %ctx.request_id,
                    target_id = %self.target,
                    error = %error,
                    "Probe failed, circuit re-opened"
                );
            }
            CircuitState::Closed if st.failures.len() >= config.threshold as usize => {
                st.state = CircuitState::Open;
                st.opened_at = Some(now);
                tracing::warn!(
                    request_id = %ctx.request_id,
                    target_id = %self.target,
                    failures = st.failures.len(),
                    threshold = config.threshold,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Current state; reports Half-Open once the cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let config = self.config.load();
        let mut st = self.lock();
        self.refresh(&mut st, Instant::now(), &config);
        st.state
    }

    /// Trip the circuit manually. The cooldown starts now.
    pub fn force_open(&self, reason: &str) {
        let mut st = self.lock();
        st.state = CircuitState::Open;
        st.opened_at = Some(Instant::now());
        st.probe = None;
        st.last_failure = Some(format!("forced open: {reason}"));
        tracing::warn!(target_id = %self.target, reason, "Circuit breaker forced open");
    }

    /// Close the circuit and forget recent failures.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.failures.clear();
        st.opened_at = None;
        st.probe = None;
        tracing::info!(target_id = %self.target, "Circuit breaker reset");
    }

    pub fn stats(&self) -> CircuitStats {
        let config = self.config.load();
        let now = Instant::now();
        let mut st = self.lock();
        self.refresh(&mut st, now, &config);
        st.prune(now, config.time_window());

        CircuitStats {
            target: self.target.clone(),
            state: st.state,
            enabled: config.enabled,
            recent_failures: st.failures.len(),
            threshold: config.threshold,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            cooldown_remaining_ms: st.cooldown_remaining(now, config.cooldown()).as_millis() as u64,
            last_failure: st.last_failure.clone(),
        }
    }
}

/// One breaker per target, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: Arc<ArcSwap<CircuitBreakerConfig>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn get_or_create(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(target) {
            return breaker.clone();
        }
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_shared_config(target, self.config.clone()))
            })
            .clone()
    }

    pub fn get(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(target).map(|b| b.clone())
    }

    /// Stats for every known target, sorted by target.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }

    /// Targets whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<_> = self
            .breakers
            .iter()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.key().clone())
            .collect();
        open.sort();
        open
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Swap in new settings; existing breakers see them on their next call.
    pub fn reload(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }
}
