//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (coordinator.rs):
//!     RunDelegate::routines → spawned, each with a ShutdownSignal
//!     RunDelegate::wrap_run(Runner::run(hooks)) → serving loop
//!
//! Wait:
//!     SIGTERM/SIGINT (signals.rs) or fatal serving error
//!
//! Shutdown (coordinator.rs, bounded by one deadline):
//!     RunDelegate::wrap_shutdown(
//!         Runner::shutdown → hooks → Shutdown::trigger (shutdown.rs)
//!         → wait for every routine
//!     )
//! ```
//!
//! # Design Decisions
//! - Shutdown has a timeout: outstanding work is reported, never awaited forever
//! - Shutdown is idempotent and safe to call concurrently
//! - A fatal serving error still runs the full shutdown before it is returned

pub mod coordinator;
pub mod runner;
pub mod shutdown;
pub mod signals;

use std::sync::Arc;

pub use coordinator::{Lifecycle, LifecycleError, LifecycleState, DEFAULT_SHUTDOWN_TIMEOUT};
pub use runner::{
    routine, LoggingRunDelegate, NilRunDelegate, RunDelegate, RunRoutine, Runner, ServeError,
    ShutdownError, ShutdownHook,
};
pub use shutdown::{Shutdown, ShutdownSignal};

use crate::config::LifecycleConfig;

/// Run `runner` until SIGINT/SIGTERM, then shut everything down within the
/// configured timeout.
pub async fn run<R, D>(runner: Arc<R>, delegate: D, config: &LifecycleConfig) -> Result<(), LifecycleError>
where
    R: Runner,
    D: RunDelegate,
{
    Lifecycle::new(runner, Arc::new(delegate))
        .with_shutdown_timeout(config.shutdown_timeout())
        .run_until(signals::termination())
        .await
}
