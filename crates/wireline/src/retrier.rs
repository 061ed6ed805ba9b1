//! Exponential-backoff retry driver.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{NetError, Result};
use crate::signal::Signal;

/// Backoff policy for a [`Retrier`].
#[derive(Clone, Copy, Debug)]
pub struct RetrierOptions {
    /// Delay after the first failed attempt.
    pub delay: Duration,
    /// Growth factor applied to the delay after each further failure.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetrierOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            max_attempts: None,
        }
    }
}

impl RetrierOptions {
    /// The delay to wait after the `attempt`-th failure (1-based).
    ///
    /// Pure in the options: `delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let scaled = self.delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

type RetryFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type RetryAction = Arc<dyn Fn() -> RetryFuture + Send + Sync>;

/// Repeatedly runs a fallible async action with exponential backoff.
///
/// One attempt is in flight at a time. [`resume`](Self::resume) starts the
/// attempt loop on a background task; the loop stops on the first success,
/// when `max_attempts` is exhausted, or when [`cancel`](Self::cancel) is
/// called. The terminal outcome is published on [`finished`](Self::finished).
pub struct Retrier {
    options: RetrierOptions,
    action: RetryAction,
    attempts: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    // Each resume starts a new generation; a loop from an older generation
    // exits instead of attempting.
    epoch: Arc<AtomicU64>,
    /// Emits `Ok(())` on success, the last attempt's error when attempts ran
    /// out, or [`NetError::Cancelled`] after a cancel.
    pub finished: Arc<Signal<Result<()>>>,
}

impl Retrier {
    /// Create a retrier over `action`. Nothing runs until
    /// [`resume`](Self::resume).
    pub fn new<F, Fut>(options: RetrierOptions, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            options,
            action: Arc::new(move || Box::pin(action()) as RetryFuture),
            attempts: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(Signal::new()),
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Whether the attempt loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start (or restart) the attempt loop.
    ///
    /// A no-op while already running. Restarting after a terminal outcome
    /// resets the attempt counter.
    pub fn resume(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        // A loop from an earlier run, still parked in its backoff sleep, must
        // not wake up into this one; it sees a newer generation and bows out.
        let generation = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.attempts.store(0, Ordering::Release);

        let options = self.options;
        let action = Arc::clone(&self.action);
        let attempts = Arc::clone(&self.attempts);
        let running = Arc::clone(&self.running);
        let epoch = Arc::clone(&self.epoch);
        let finished = Arc::clone(&self.finished);

        tokio::spawn(async move {
            loop {
                let superseded = epoch.load(Ordering::Acquire) != generation;
                if superseded || !running.load(Ordering::Acquire) {
                    finished.emit(Err(NetError::Cancelled));
                    return;
                }

                let attempt = attempts.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(target: "wireline::retrier", attempt, "attempt starting");

                match (action)().await {
                    Ok(()) => {
                        if epoch.load(Ordering::Acquire) == generation {
                            running.store(false, Ordering::Release);
                        }
                        finished.emit(Ok(()));
                        return;
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: "wireline::retrier",
                            attempt,
                            error = %err,
                            "attempt failed"
                        );
                        if options.max_attempts.is_some_and(|max| attempt >= max) {
                            if epoch.load(Ordering::Acquire) == generation {
                                running.store(false, Ordering::Release);
                            }
                            finished.emit(Err(err));
                            return;
                        }
                        tokio::time::sleep(options.delay_for_attempt(attempt)).await;
                    }
                }
            }
        });
    }

    /// Stop retrying. The loop notices before starting its next attempt and
    /// emits [`NetError::Cancelled`] on [`finished`](Self::finished).
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("options", &self.options)
            .field("attempts", &self.attempts())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_options(max_attempts: Option<u32>) -> RetrierOptions {
        RetrierOptions {
            delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let options = RetrierOptions::default();
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(options.delay_for_attempt(3), Duration::from_secs(1));
        assert_eq!(options.delay_for_attempt(6), Duration::from_secs(8));
        // Far past the cap, still the cap (and no overflow).
        assert_eq!(options.delay_for_attempt(1000), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let retrier = Retrier::new(fast_options(Some(3)), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(NetError::Timeout)
            }
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        retrier.finished.connect(move |outcome| {
            let _ = tx.send(outcome.clone());
        });

        retrier.resume();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome, Err(NetError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retrier.attempts(), 3);
        assert!(!retrier.is_running());
    }

    #[tokio::test]
    async fn first_success_ends_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let retrier = Retrier::new(fast_options(None), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(NetError::Timeout)
                } else {
                    Ok(())
                }
            }
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        retrier.finished.connect(move |outcome| {
            let _ = tx.send(outcome.clone());
        });

        retrier.resume();
        assert_eq!(rx.recv().await.unwrap(), Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancel_reports_cancelled() {
        let retrier = Retrier::new(fast_options(None), || async {
            Err(NetError::Timeout)
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        retrier.finished.connect(move |outcome| {
            let _ = tx.send(outcome.clone());
        });

        retrier.resume();
        tokio::time::sleep(Duration::from_millis(5)).await;
        retrier.cancel();
        assert_eq!(rx.recv().await.unwrap(), Err(NetError::Cancelled));
        assert!(!retrier.is_running());
    }

    #[tokio::test]
    async fn resume_after_cancel_does_not_revive_the_parked_loop() {
        let options = RetrierOptions {
            delay: Duration::from_millis(30),
            multiplier: 1.0,
            max_delay: Duration::from_millis(30),
            max_attempts: None,
        };
        let retrier = Retrier::new(options, || async { Err(NetError::Timeout) });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        retrier.finished.connect(move |outcome| {
            let _ = tx.send(outcome.clone());
        });

        retrier.resume();
        // Let attempt 1 fail and park the loop in its backoff sleep.
        tokio::time::sleep(Duration::from_millis(5)).await;
        retrier.cancel();
        retrier.resume();

        // The superseded loop reports Cancelled when it wakes; the fresh run
        // keeps going on its own.
        assert_eq!(rx.recv().await.unwrap(), Err(NetError::Cancelled));
        assert!(retrier.is_running());

        retrier.cancel();
        assert_eq!(rx.recv().await.unwrap(), Err(NetError::Cancelled));
        assert!(!retrier.is_running());
    }

    #[tokio::test]
    async fn resume_is_idempotent_while_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let retrier = Retrier::new(fast_options(None), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
        });

        retrier.resume();
        retrier.resume();
        retrier.resume();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        retrier.cancel();
    }
}
