//! Start/stop coordination of a runner and its background routines.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant};
use tokio_util::task::TaskTracker;

use crate::lifecycle::{
    RunDelegate, Runner, ServeError, Shutdown, ShutdownError, ShutdownHook, ShutdownSignal,
};
use crate::observability::metrics;

/// Shutdown deadline used when none is configured.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
    /// Shutdown finished with an error or missed its deadline.
    Failed,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("lifecycle already started")]
    AlreadyStarted,

    #[error("serving loop failed: {0}")]
    Serve(#[source] ServeError),

    #[error("shutdown did not complete within {timeout:?} ({outstanding} routines still running)")]
    ShutdownTimedOut { timeout: Duration, outstanding: usize },

    #[error("shutdown failed: {0}")]
    Shutdown(#[source] ShutdownError),
}

/// How the shutdown sequence ended, replayed to every later caller.
#[derive(Debug, Clone)]
enum Outcome {
    Clean,
    TimedOut { outstanding: usize },
    Failed(String),
}

impl Outcome {
    fn of(result: &Result<(), LifecycleError>) -> Self {
        match result {
            Ok(()) => Outcome::Clean,
            Err(LifecycleError::ShutdownTimedOut { outstanding, .. }) => Outcome::TimedOut {
                outstanding: *outstanding,
            },
            Err(LifecycleError::Shutdown(ShutdownError::Failed(source))) => {
                Outcome::Failed(source.to_string())
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    fn into_result(self, timeout: Duration) -> Result<(), LifecycleError> {
        match self {
            Outcome::Clean => Ok(()),
            Outcome::TimedOut { outstanding } => Err(LifecycleError::ShutdownTimedOut {
                timeout,
                outstanding,
            }),
            Outcome::Failed(message) => {
                Err(LifecycleError::Shutdown(ShutdownError::Failed(message.into())))
            }
        }
    }
}

/// Runs a [`Runner`] together with the routines of a [`RunDelegate`] and
/// stops them all within a bounded time.
pub struct Lifecycle<R: Runner> {
    runner: Arc<R>,
    delegate: Arc<dyn RunDelegate>,
    shutdown_timeout: Duration,
    shutdown: Shutdown,
    tracker: TaskTracker,
    state: Arc<watch::Sender<LifecycleState>>,
    outcome: Arc<Mutex<Option<Outcome>>>,
    serve_failure: Mutex<Option<oneshot::Receiver<ServeError>>>,
}

impl<R: Runner> Lifecycle<R> {
    pub fn new(runner: Arc<R>, delegate: Arc<dyn RunDelegate>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            runner,
            delegate,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            shutdown: Shutdown::new(),
            tracker: TaskTracker::new(),
            state: Arc::new(state),
            outcome: Arc::new(Mutex::new(None)),
            serve_failure: Mutex::new(None),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The signal handed to routines; fires when shutdown begins.
    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    /// Start the serving loop and every delegate routine without waiting
    /// for them.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let started = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Idle {
                *state = LifecycleState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(LifecycleError::AlreadyStarted);
        }

        let routines = self.delegate.routines();
        let routine_count = routines.len();
        for routine in routines {
            self.tracker.spawn(routine(self.shutdown.subscribe()));
        }

        let (failure_tx, failure_rx) = oneshot::channel();
        *self
            .serve_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure_rx);

        let runner = Arc::clone(&self.runner);
        let delegate = Arc::clone(&self.delegate);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let hooks: Vec<ShutdownHook> = vec![Box::new(move || shutdown.trigger())];
            match delegate.wrap_run(Box::pin(runner.run(hooks))).await {
                Ok(()) => tracing::debug!("Serving loop closed"),
                Err(e) => {
                    tracing::error!(error = %e, "Serving loop failed");
                    let _ = failure_tx.send(e);
                }
            }
        });

        tracing::info!(routines = routine_count, "Lifecycle started");
        Ok(())
    }

    /// Stop the runner, cancel every routine and wait for them, all within
    /// the shutdown timeout.
    ///
    /// Safe to call more than once and concurrently: the sequence runs once,
    /// on its own task, so it completes even if this future is dropped.
    /// Later calls wait for it and report the same outcome.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let mut previous = LifecycleState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                LifecycleState::Running => {
                    *state = LifecycleState::ShuttingDown;
                    true
                }
                LifecycleState::Idle => {
                    *state = LifecycleState::Stopped;
                    true
                }
                _ => false,
            }
        });

        match previous {
            LifecycleState::Running => {}
            LifecycleState::ShuttingDown => return self.wait_for_outcome().await,
            LifecycleState::Stopped | LifecycleState::Failed => return self.recorded_outcome(),
            LifecycleState::Idle => return Ok(()),
        }

        let sequence = ShutdownSequence {
            runner: Arc::clone(&self.runner),
            delegate: Arc::clone(&self.delegate),
            timeout: self.shutdown_timeout,
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            state: Arc::clone(&self.state),
            outcome: Arc::clone(&self.outcome),
        };
        match tokio::spawn(sequence.run()).await {
            Ok(result) => result,
            Err(e) => {
                let result = Err(LifecycleError::Shutdown(ShutdownError::Failed(Box::new(e))));
                record(&self.outcome, &self.state, &result);
                result
            }
        }
    }

    async fn wait_for_outcome(&self) -> Result<(), LifecycleError> {
        let mut states = self.state.subscribe();
        // The sequence is bounded by one timeout; the second covers a
        // sequence task that died before recording its outcome
        let finished = time::timeout(
            self.shutdown_timeout * 2,
            states.wait_for(|state| {
                matches!(state, LifecycleState::Stopped | LifecycleState::Failed)
            }),
        )
        .await
        .is_ok();
        if finished {
            self.recorded_outcome()
        } else {
            Err(LifecycleError::ShutdownTimedOut {
                timeout: self.shutdown_timeout,
                outstanding: self.tracker.len(),
            })
        }
    }

    fn recorded_outcome(&self) -> Result<(), LifecycleError> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map_or(Ok(()), |outcome| outcome.into_result(self.shutdown_timeout))
    }

    /// Start, wait for `trigger` or a fatal serving error, then shut down.
    ///
    /// A fatal serving error still runs the full shutdown so routines are
    /// cancelled and awaited; the serving error is what gets returned.
    pub async fn run_until<F>(&self, trigger: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        let failure = self
            .serve_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let serve_error = tokio::select! {
            _ = trigger => None,
            Some(e) = serve_failed(failure) => Some(e),
        };

        let shutdown = self.shutdown().await;
        match serve_error {
            Some(e) => {
                if let Err(shutdown_error) = shutdown {
                    tracing::warn!(error = %shutdown_error, "Shutdown after serving failure was incomplete");
                }
                Err(LifecycleError::Serve(e))
            }
            None => shutdown,
        }
    }
}

/// One run of the shutdown sequence, owned by its own task.
struct ShutdownSequence<R: Runner> {
    runner: Arc<R>,
    delegate: Arc<dyn RunDelegate>,
    timeout: Duration,
    shutdown: Shutdown,
    tracker: TaskTracker,
    state: Arc<watch::Sender<LifecycleState>>,
    outcome: Arc<Mutex<Option<Outcome>>>,
}

impl<R: Runner> ShutdownSequence<R> {
    async fn run(self) -> Result<(), LifecycleError> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let sequence = self.delegate.wrap_shutdown(Box::pin(async {
            self.runner.shutdown(deadline).await?;
            self.shutdown.trigger();
            self.tracker.close();
            self.tracker.wait().await;
            Ok::<(), ShutdownError>(())
        }));
        let outcome = time::timeout_at(deadline, sequence).await;

        // Routines are told to stop even when the runner could not be stopped
        self.shutdown.trigger();
        self.tracker.close();

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ShutdownError::DeadlineExceeded)) | Err(_) => {
                Err(LifecycleError::ShutdownTimedOut {
                    timeout,
                    outstanding: self.tracker.len(),
                })
            }
            Ok(Err(e)) => Err(LifecycleError::Shutdown(e)),
        };
        record(&self.outcome, &self.state, &result);
        result
    }
}

/// Store the outcome before publishing the final state so waiters see it.
fn record(
    outcome: &Mutex<Option<Outcome>>,
    state: &watch::Sender<LifecycleState>,
    result: &Result<(), LifecycleError>,
) {
    *outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(Outcome::of(result));
    match result {
        Ok(()) => {
            state.send_replace(LifecycleState::Stopped);
            metrics::record_shutdown("clean");
            tracing::info!("Lifecycle stopped");
        }
        Err(e) => {
            state.send_replace(LifecycleState::Failed);
            metrics::record_shutdown("failed");
            tracing::error!(error = %e, "Lifecycle shutdown failed");
        }
    }
}

/// Resolves with the serving error, or `None` if serving ended cleanly.
async fn serve_failed(failure: Option<oneshot::Receiver<ServeError>>) -> Option<ServeError> {
    failure?.await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{routine, LoggingRunDelegate, NilRunDelegate, RunRoutine};
    use async_trait::async_trait;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Serves until shut down, running the registered hooks on shutdown.
    #[derive(Default)]
    struct FakeRunner {
        stop: CancellationToken,
        hooks: Mutex<Vec<ShutdownHook>>,
    }

    #[async_trait]
    impl Runner for FakeRunner {
        async fn run(&self, on_shutdown: Vec<ShutdownHook>) -> Result<(), ServeError> {
            *self.hooks.lock().unwrap() = on_shutdown;
            self.stop.cancelled().await;
            Ok(())
        }

        async fn shutdown(&self, _deadline: Instant) -> Result<(), ShutdownError> {
            self.stop.cancel();
            let hooks = std::mem::take(&mut *self.hooks.lock().unwrap());
            for hook in hooks {
                hook();
            }
            Ok(())
        }
    }

    struct BrokenRunner;

    #[async_trait]
    impl Runner for BrokenRunner {
        async fn run(&self, _: Vec<ShutdownHook>) -> Result<(), ServeError> {
            Err(ServeError::AlreadyRunning)
        }

        async fn shutdown(&self, _deadline: Instant) -> Result<(), ShutdownError> {
            Ok(())
        }
    }

    fn counting_routine(done: Arc<AtomicUsize>) -> RunRoutine {
        routine(move |signal: ShutdownSignal| {
            let done = done.clone();
            async move {
                signal.cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn test_all_routines_finish_before_shutdown_returns() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut delegate = LoggingRunDelegate::new();
        for _ in 0..5 {
            delegate = delegate.with_routine(counting_routine(done.clone()));
        }
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(delegate));

        lifecycle.start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        lifecycle.shutdown().await.unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(NilRunDelegate));
        lifecycle.start().unwrap();

        let (first, second) = tokio::join!(lifecycle.shutdown(), lifecycle.shutdown());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(lifecycle.shutdown().await.is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(NilRunDelegate));
        assert!(lifecycle.shutdown().await.is_ok());
        assert!(matches!(lifecycle.start(), Err(LifecycleError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(NilRunDelegate));
        lifecycle.start().unwrap();
        assert!(matches!(lifecycle.start(), Err(LifecycleError::AlreadyStarted)));
        lifecycle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stuck_routine_bounded_by_deadline() {
        let deadline = Duration::from_millis(200);
        let delegate = LoggingRunDelegate::new()
            .with_routine(routine(|_signal| std::future::pending::<()>()));
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(delegate))
            .with_shutdown_timeout(deadline);

        lifecycle.start().unwrap();
        let started = std::time::Instant::now();
        let result = lifecycle.shutdown().await;
        let elapsed = started.elapsed();

        match result {
            Err(LifecycleError::ShutdownTimedOut { outstanding, .. }) => assert_eq!(outstanding, 1),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed >= deadline);
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_every_caller_sees_the_timeout() {
        let delegate = LoggingRunDelegate::new()
            .with_routine(routine(|_signal| std::future::pending::<()>()));
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(delegate))
            .with_shutdown_timeout(Duration::from_millis(200));
        lifecycle.start().unwrap();

        let (first, second) = tokio::join!(lifecycle.shutdown(), lifecycle.shutdown());
        for result in [first, second, lifecycle.shutdown().await] {
            match result {
                Err(LifecycleError::ShutdownTimedOut { outstanding, .. }) => {
                    assert_eq!(outstanding, 1)
                }
                other => panic!("expected timeout, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_abandoned_shutdown_still_completes() {
        let done = Arc::new(AtomicUsize::new(0));
        let finished = done.clone();
        let delegate = LoggingRunDelegate::new().with_routine(routine(move |signal: ShutdownSignal| {
            let finished = finished.clone();
            async move {
                signal.cancelled().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(delegate))
            .with_shutdown_timeout(Duration::from_secs(1));
        lifecycle.start().unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(50), lifecycle.shutdown()).await;
        assert!(abandoned.is_err());
        assert_eq!(lifecycle.state(), LifecycleState::ShuttingDown);

        let result = tokio::time::timeout(Duration::from_secs(3), lifecycle.shutdown())
            .await
            .expect("second shutdown must not hang");
        assert!(result.is_ok());
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_routines_see_runner_hook() {
        let runner = Arc::new(FakeRunner::default());
        let lifecycle = Lifecycle::new(runner.clone(), Arc::new(NilRunDelegate));
        let signal = lifecycle.signal();

        lifecycle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.shutdown(Instant::now()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        lifecycle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_failure_still_cancels_routines() {
        let done = Arc::new(AtomicUsize::new(0));
        let delegate = LoggingRunDelegate::new().with_routine(counting_routine(done.clone()));
        let lifecycle = Lifecycle::new(Arc::new(BrokenRunner), Arc::new(delegate));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            lifecycle.run_until(std::future::pending::<()>()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(LifecycleError::Serve(ServeError::AlreadyRunning))));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_until_trigger() {
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), Arc::new(NilRunDelegate));
        let result = lifecycle
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(result.is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[derive(Default)]
    struct CountingDelegate {
        runs: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl RunDelegate for CountingDelegate {
        async fn wrap_run(
            &self,
            run: BoxFuture<'_, Result<(), ServeError>>,
        ) -> Result<(), ServeError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            run.await
        }

        async fn wrap_shutdown(
            &self,
            shutdown: BoxFuture<'_, Result<(), ShutdownError>>,
        ) -> Result<(), ShutdownError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            shutdown.await
        }
    }

    #[tokio::test]
    async fn test_wrappers_invoked_once() {
        let delegate = Arc::new(CountingDelegate::default());
        let lifecycle = Lifecycle::new(Arc::new(FakeRunner::default()), delegate.clone());

        lifecycle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle.shutdown().await.unwrap();
        lifecycle.shutdown().await.unwrap();

        assert_eq!(delegate.runs.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.shutdowns.load(Ordering::SeqCst), 1);
    }
}
