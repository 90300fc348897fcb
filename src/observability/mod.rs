//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (subscriber setup for structured log events)
//!     → request.rs (per-request logger: timer, status, completion line)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, plain or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the request span into every log event
//! - Metrics are cheap (atomic increments), recorded without an exporter too

pub mod logging;
pub mod metrics;
pub mod request;

pub use request::{RequestLogger, SharedRequestLogger, TracingRequestLogger};
