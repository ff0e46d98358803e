//! ILPC Middleware: per-account packet pipelines.
//!
//! This crate provides:
//! - [`MiddlewarePipeline`]: named, ordered interceptor chains with a terminal handler.
//! - [`Middleware`]: the trait every interceptor implements to install itself.
//! - [`MiddlewareManager`]: builds the pipelines when a plugin is attached and
//!   routes packets through them.
//! - [`builtins`]: error handling, rate limiting, balances, deduplication, expiry and more.
//! - [`Stats`]: the counters the built-ins report into.

pub mod builtins;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod stats;
pub mod token_bucket;
pub mod traits;

// Re-exports for convenience.
pub use builtins::{Alert, AlertMiddleware, BalanceMiddleware, BalanceSnapshot, BalanceStatus};
pub use error::PipelineError;
pub use manager::{MiddlewareManager, OutgoingHandlers};
pub use pipeline::{compose, handler, Handler, MiddlewarePipeline, Next, PipelineEntry, Pipelines};
pub use stats::{Metric, Sample, Stats};
pub use token_bucket::TokenBucket;
pub use traits::{DataProcessor, Middleware, MiddlewareServices};
