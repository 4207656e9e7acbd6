//! # Stagewire
//!
//! Composable asynchronous middleware pipelines.
//!
//! Stagewire builds directed dataflow graphs of asynchronous stages with
//! support for:
//!
//! - **Sequential composition**: link stages and nested pipelines in order
//! - **Concurrent side branches**: fork, split and intercept without
//!   affecting a run's result
//! - **Conditional routing**: filter, branch and loop on runtime predicates
//! - **Failure routing**: catch every stage failure in a dedicated pipeline
//! - **Admission control**: bounded queues, throttling and termination
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewire::prelude::*;
//!
//! let pipeline = compose(vec![
//!     Stage::map("double", |n: i32| n * 2),
//!     Stage::map("increment", |n: i32| n + 1),
//! ])
//! .fork(Stage::inspect("audit", |n: &i32| tracing::info!(n, "audited")))
//! .catch(Stage::inspect("report", |f: &Failed<i32>| tracing::error!(error = %f.error)));
//!
//! assert_eq!(pipeline.run(5).await?, 11);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod signal;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{PipelineConfig, QueueConfig, ThrottleConfig};
    pub use crate::core::{Completed, Envelope, Failed, Fault, RunTag, Value};
    pub use crate::errors::FlowError;
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent, RunEventKind,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{compose, Pipeline, Unit};
    pub use crate::signal::{Signal, SubscriptionId};
    pub use crate::stages::{Handler, IntoOutput, Stage};
}
