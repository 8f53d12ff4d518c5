//! # Stagehand Readiness Poller
//!
//! The single retry combinator used by every stage. A poll repeatedly runs
//! one check against an external system until it reports readiness, sleeping
//! between attempts according to a [`RetryPolicy`]:
//!
//! - `Ok(Some(_))` / `Ok(true)` ends the poll successfully.
//! - `Ok(None)` / `Ok(false)` and transient or conflict errors are retried
//!   after the current backoff delay; errors are logged at `warn`.
//! - A fatal error aborts immediately.
//! - Exhausting the policy yields [`PollError::DeadlineExceeded`] with the
//!   last observation attached.
//!
//! Cancellation ([`CancelSignal`]) is checked before every attempt and
//! interrupts backoff sleeps. An attempt already in flight is allowed to
//! finish.
pub mod error;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::adapter::error::AdapterResult;
pub use error::PollError;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Policy without any sleeping, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Sending half of the orchestrator-wide cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

/// Receiving half; cheap to clone into every stage task
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

/// Create a connected cancellation handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let handle = CancelHandle::new();
    let signal = handle.signal();
    (handle, signal)
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        if !self.sender.send_replace(true) {
            log::warn!("Cancellation requested; no new stages or retries will start");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if every
    /// handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Poll `predicate` until it reports ready, the policy is exhausted, a fatal
/// error occurs or `cancel` fires.
pub async fn await_ready<F, Fut>(
    what: &str,
    predicate: F,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<bool>>,
{
    Poller::new(*policy, cancel.clone()).await_ready(what, predicate).await
}

/// A retry policy bound to a cancellation signal, counting every attempt it
/// makes across calls.
#[derive(Debug, Clone)]
pub struct Poller {
    policy: RetryPolicy,
    cancel: CancelSignal,
    attempts: Arc<AtomicU32>,
}

impl Poller {
    pub fn new(policy: RetryPolicy, cancel: CancelSignal) -> Self {
        Self {
            policy,
            cancel,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Total attempts made through this poller and its clones
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until `predicate` returns `true`
    pub async fn await_ready<F, Fut>(&self, what: &str, mut predicate: F) -> Result<(), PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<bool>>,
    {
        self.poll(what, || {
            let check = predicate();
            async move { check.await.map(|ready| ready.then_some(())) }
        })
        .await
    }

    /// Run `op` until it succeeds, retrying transient failures
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        self.poll(what, || {
            let attempt = op();
            async move { attempt.await.map(Some) }
        })
        .await
    }

    /// General form: `Ok(None)` means "not yet"
    pub async fn poll<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<Option<T>>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_observed: Option<String> = None;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(what, attempt - 1));
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);

            match op().await {
                Ok(Some(value)) => {
                    if attempt > 1 {
                        log::debug!("{}: ready after {} attempt(s)", what, attempt);
                    }
                    return Ok(value);
                }
                Ok(None) => {
                    log::debug!("{}: not ready (attempt {}/{})", what, attempt, max_attempts);
                    last_observed = Some("not ready".to_string());
                }
                Err(err) if err.is_fatal() => {
                    log::error!("{}: fatal error on attempt {}: {}", what, attempt, err);
                    return Err(PollError::fatal(what, attempt, err));
                }
                Err(err) => {
                    log::warn!("{}: attempt {}/{} failed: {}", what, attempt, max_attempts, err);
                    last_observed = Some(err.to_string());
                }
            }

            if self.cancel.is_cancelled() {
                return Err(self.cancelled(what, attempt));
            }
            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => return Err(self.cancelled(what, attempt)),
                }
            }
        }

        Err(PollError::DeadlineExceeded {
            what: what.to_string(),
            attempts: max_attempts,
            last_observed,
        })
    }

    fn cancelled(&self, what: &str, attempts: u32) -> PollError {
        log::info!("{}: cancelled after {} attempt(s)", what, attempts);
        PollError::Cancelled {
            what: what.to_string(),
            attempts,
        }
    }
}
