//! FIFO admission controller.
//!
//! # Responsibilities
//! - Bound concurrently running calls by `max_concurrent`
//! - Queue excess calls FIFO up to `max_queue`, reject the rest
//! - Hand a freed running slot directly to the next live waiter
//! - Release queue and running slots when a caller gives up

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::admission::stats::AdmissionStats;
use crate::config::schema::BottleneckConfig;
use crate::context::CallContext;
use crate::error::InvokeError;
use crate::resilience::timeouts;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Weight of the newest sample in the execution-time average.
const EXECUTION_EMA_ALPHA: f64 = 0.2;

struct QueueEntry {
    id: u64,
    target: String,
    enqueued_at: Instant,
    notify: oneshot::Sender<()>,
}

struct QueueState {
    limits: BottleneckConfig,
    running: usize,
    queue: VecDeque<QueueEntry>,
    next_id: u64,
    scheduled: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
    cancelled: u64,
    avg_execution_ms: Option<f64>,
}

impl QueueState {
    fn has_capacity(&self) -> bool {
        !self.limits.enabled || self.running < self.limits.max_concurrent
    }

    /// Move waiters into running slots while capacity allows.
    fn promote_waiters(&mut self) {
        while self.has_capacity() {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            if entry.notify.send(()).is_ok() {
                self.running += 1;
                tracing::debug!(
                    entry_id = entry.id,
                    target = %entry.target,
                    waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "Queued call admitted"
                );
            }
        }
    }

    fn retry_after(&self) -> Duration {
        let floor = self.limits.min_retry_after_ms;
        let max_concurrent = self.limits.max_concurrent.max(1);
        let waves = (self.queue.len() + 1).div_ceil(max_concurrent) as f64;
        let estimate = self.avg_execution_ms.unwrap_or(0.0) * waves;

        Duration::from_millis((estimate.ceil() as u64).max(floor))
    }

    fn record_execution(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_execution_ms = Some(match self.avg_execution_ms {
            Some(avg) => avg * (1.0 - EXECUTION_EMA_ALPHA) + sample * EXECUTION_EMA_ALPHA,
            None => sample,
        });
    }
}

/// Global admission gate in front of the whole pipeline.
pub struct AdmissionController {
    state: Mutex<QueueState>,
}

enum Admission<'a> {
    Run(Permit<'a>),
    Wait(Ticket<'a>),
}

/// A running slot. Dropping it hands the slot to the next waiter.
pub struct Permit<'a> {
    controller: &'a AdmissionController,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.controller.release_slot();
    }
}

/// A queue position. Dropping it before admission leaves the queue; a slot
/// granted to a ticket that is no longer waiting is released.
struct Ticket<'a> {
    controller: &'a AdmissionController,
    id: u64,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl<'a> Ticket<'a> {
    async fn wait(mut self, ctx: &CallContext) -> Result<Permit<'a>, InvokeError> {
        match timeouts::guard(ctx, &mut self.rx).await? {
            Ok(()) => {
                self.granted = true;
                Ok(Permit {
                    controller: self.controller,
                })
            }
            Err(_) => Err(InvokeError::Cancelled),
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }

        let mut st = self.controller.lock();
        if let Some(pos) = st.queue.iter().position(|entry| entry.id == self.id) {
            st.queue.remove(pos);
            st.cancelled += 1;
            return;
        }

        if self.rx.try_recv().is_ok() {
            st.running = st.running.saturating_sub(1);
            st.cancelled += 1;
            st.promote_waiters();
        }
    }
}

impl AdmissionController {
    pub fn new(limits: BottleneckConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                limits,
                running: 0,
                queue: VecDeque::new(),
                next_id: 0,
                scheduled: 0,
                completed: 0,
                failed: 0,
                rejected: 0,
                cancelled: 0,
                avg_execution_ms: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `fut` once a running slot is available.
    ///
    /// Rejects with [`InvokeError::QueueFull`] without polling `fut` when both
    /// the running slots and the queue are full.
    pub async fn schedule<T, Fut>(&self, ctx: &CallContext, fut: Fut) -> Result<T, InvokeError>
    where
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let _permit = match self.admit(ctx)? {
            Admission::Run(permit) => permit,
            Admission::Wait(ticket) => ticket.wait(ctx).await?,
        };

        self.lock().scheduled += 1;
        let started = Instant::now();
        let result = fut.await;
        self.record_outcome(&result, started.elapsed());

        result
    }

    fn admit(&self, ctx: &CallContext) -> Result<Admission<'_>, InvokeError> {
        let mut st = self.lock();

        if st.has_capacity() && st.queue.is_empty() {
            st.running += 1;
            return Ok(Admission::Run(Permit { controller: self }));
        }

        if st.queue.len() < st.limits.max_queue {
            let (tx, rx) = oneshot::channel();
            let id = st.next_id;
            st.next_id += 1;
            st.queue.push_back(QueueEntry {
                id,
                target: ctx.target.clone(),
                enqueued_at: Instant::now(),
                notify: tx,
            });
            tracing::debug!(
                request_id = %ctx.request_id,
                operation = %ctx.operation,
                running = st.running,
                queued = st.queue.len(),
                "Call queued"
            );
            return Ok(Admission::Wait(Ticket {
                controller: self,
                id,
                rx,
                granted: false,
            }));
        }

        st.rejected += 1;
        let retry_after = st.retry_after();
        tracing::warn!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            running = st.running,
            queued = st.queue.len(),
            retry_after_ms = retry_after.as_millis() as u64,
            "Admission queue full, rejecting call"
        );

        Err(InvokeError::QueueFull {
            running: st.running,
            queued: st.queue.len(),
            retry_after,
        })
    }

    fn record_outcome<T>(&self, result: &Result<T, InvokeError>, elapsed: Duration) {
        let mut st = self.lock();
        match result {
            Ok(_) => st.completed += 1,
            Err(error) if error.is_cancellation() => st.cancelled += 1,
            Err(_) => st.failed += 1,
        }
        st.record_execution(elapsed);
    }

    fn release_slot(&self) {
        let mut st = self.lock();
        st.running = st.running.saturating_sub(1);
        st.promote_waiters();
    }

    /// Apply new limits. Waiters are promoted if capacity grew; nothing
    /// already queued or running is evicted.
    pub fn reload(&self, limits: BottleneckConfig) {
        let mut st = self.lock();
        st.limits = limits;
        st.promote_waiters();
    }

    pub fn stats(&self) -> AdmissionStats {
        let st = self.lock();
        let utilization_percent = if st.limits.enabled && st.limits.max_concurrent > 0 {
            st.running as f64 / st.limits.max_concurrent as f64 * 100.0
        } else {
            0.0
        };

        AdmissionStats {
            enabled: st.limits.enabled,
            running: st.running,
            queued: st.queue.len(),
            max_concurrent: st.limits.max_concurrent,
            max_queue: st.limits.max_queue,
            scheduled: st.scheduled,
            completed: st.completed,
            failed: st.failed,
            rejected: st.rejected,
            cancelled: st.cancelled,
            utilization_percent,
            oldest_wait_ms: st
                .queue
                .front()
                .map(|entry| entry.enqueued_at.elapsed().as_millis() as u64)
                .unwrap_or(0),
            avg_execution_ms: st.avg_execution_ms.unwrap_or(0.0),
        }
    }

    /// Zero the counters. Running and queued calls are unaffected.
    pub fn reset_stats(&self) {
        let mut st = self.lock();
        st.scheduled = 0;
        st.completed = 0;
        st.failed = 0;
        st.rejected = 0;
        st.cancelled = 0;
        st.avg_execution_ms = None;
    }

    pub fn is_idle(&self) -> bool {
        let st = self.lock();
        st.running == 0 && st.queue.is_empty()
    }

    /// Wait until nothing is running or queued. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let idle = async {
            while !self.is_idle() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    fn limits(max_concurrent: usize, max_queue: usize) -> BottleneckConfig {
        BottleneckConfig {
            enabled: true,
            max_concurrent,
            max_queue,
            min_retry_after_ms: 1000,
        }
    }

    fn ctx() -> CallContext {
        CallContext::new("test", "req", "model-a")
    }

    /// Occupy a running slot until `gate` is notified.
    fn hold(
        controller: &Arc<AdmissionController>,
        gate: &Arc<Notify>,
    ) -> tokio::task::JoinHandle<Result<(), InvokeError>> {
        let controller = controller.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            controller
                .schedule(&ctx(), async move {
                    gate.notified().await;
                    Ok(())
                })
                .await
        })
    }

    #[tokio::test]
    async fn test_runs_immediately_under_limit() {
        let controller = AdmissionController::new(limits(2, 0));
        let out = controller.schedule(&ctx(), async { Ok(5) }).await.unwrap();
        assert_eq!(out, 5);

        let stats = controller.stats();
        assert_eq!(stats.completed, 1);
        assert!(stats.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_when_queue_full_without_polling() {
        let controller = Arc::new(AdmissionController::new(limits(1, 0)));
        let gate = Arc::new(Notify::new());
        let running = hold(&controller, &gate);
        tokio::task::yield_now().await;

        let polled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = polled.clone();
        let err = controller
            .schedule(&ctx(), async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(err.code(), "QUEUE_FULL");
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1000)));
        assert_eq!(controller.stats().rejected, 1);

        gate.notify_one();
        running.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_calls_run_in_fifo_order() {
        let controller = Arc::new(AdmissionController::new(limits(1, 3)));
        let gate = Arc::new(Notify::new());
        let first = hold(&controller, &gate);
        tokio::task::yield_now().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for i in 0..3 {
            let controller = controller.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                controller
                    .schedule(&ctx(), async move {
                        order.lock().unwrap().push(i);
                        Ok(())
                    })
                    .await
            }));
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.stats().queued, 3);

        gate.notify_one();
        first.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(controller.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_leaves_queue() {
        let controller = Arc::new(AdmissionController::new(limits(1, 1)));
        let gate = Arc::new(Notify::new());
        let running = hold(&controller, &gate);
        tokio::task::yield_now().await;

        let token = CancellationToken::new();
        let waiter = {
            let controller = controller.clone();
            let ctx = ctx().with_cancellation(token.clone());
            tokio::spawn(async move { controller.schedule(&ctx, async { Ok(()) }).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(controller.stats().queued, 1);

        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));

        let stats = controller.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.cancelled, 1);

        // The freed queue slot is usable again.
        let again = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.schedule(&ctx(), async { Ok(()) }).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(controller.stats().queued, 1);

        gate.notify_one();
        running.await.unwrap().unwrap();
        again.await.unwrap().unwrap();
        assert!(controller.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_running_call_frees_slot() {
        let controller = Arc::new(AdmissionController::new(limits(1, 1)));
        let gate = Arc::new(Notify::new());
        let running = hold(&controller, &gate);
        tokio::task::yield_now().await;
        assert_eq!(controller.stats().running, 1);

        running.abort();
        let _ = running.await;

        assert_eq!(controller.stats().running, 0);
        controller.schedule(&ctx(), async { Ok(()) }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_queued() {
        let controller = Arc::new(AdmissionController::new(limits(1, 1)));
        let gate = Arc::new(Notify::new());
        let running = hold(&controller, &gate);
        tokio::task::yield_now().await;

        let ctx = ctx().with_timeout(Duration::from_millis(200));
        let err = controller.schedule(&ctx, async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.code(), "DEADLINE_EXCEEDED");
        assert_eq!(controller.stats().queued, 0);

        gate.notify_one();
        running.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_promotes_waiters() {
        let controller = Arc::new(AdmissionController::new(limits(1, 2)));
        let gate = Arc::new(Notify::new());
        let first = hold(&controller, &gate);
        tokio::task::yield_now().await;
        let second = hold(&controller, &gate);
        tokio::task::yield_now().await;
        assert_eq!(controller.stats().queued, 1);

        controller.reload(limits(2, 2));
        tokio::task::yield_now().await;
        let stats = controller.stats();
        assert_eq!(stats.running, 2);
        assert_eq!(stats.queued, 0);

        gate.notify_one();
        gate.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain() {
        let controller = Arc::new(AdmissionController::new(limits(1, 1)));
        assert!(controller.drain(Duration::from_millis(50)).await);

        let gate = Arc::new(Notify::new());
        let running = hold(&controller, &gate);
        tokio::task::yield_now().await;
        assert!(!controller.drain(Duration::from_millis(50)).await);

        gate.notify_one();
        running.await.unwrap().unwrap();
        assert!(controller.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_granted_slot_released_when_waiter_dropped() {
        let controller = AdmissionController::new(limits(1, 1));
        let shared = ctx();
        let Admission::Run(permit) = controller.admit(&shared).unwrap() else {
            panic!("first call should run immediately");
        };

        let mut waiter = Box::pin(controller.schedule(&shared, async { Ok(()) }));
        assert!(futures_util::poll!(waiter.as_mut()).is_pending());
        assert_eq!(controller.stats().queued, 1);

        // Slot handed to the waiter, which never gets polled again.
        drop(permit);
        let stats = controller.stats();
        assert_eq!((stats.running, stats.queued), (1, 0));

        drop(waiter);
        let stats = controller.stats();
        assert_eq!((stats.running, stats.queued), (0, 0));
        assert_eq!(stats.cancelled, 1);
        assert!(controller.is_idle());
    }

    #[tokio::test]
    async fn test_disabled_is_unbounded_but_counted() {
        let controller = AdmissionController::new(BottleneckConfig {
            enabled: false,
            ..limits(1, 0)
        });
        let shared = ctx();
        let results = futures_util::future::join_all(
            (0..5).map(|i| controller.schedule(&shared, async move { Ok(i) })),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        let stats = controller.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.rejected, 0);
    }
}
