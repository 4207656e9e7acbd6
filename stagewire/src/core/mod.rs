//! Core domain model types for stagewire.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The `Value` bound for anything threaded through a pipeline
//! - Run tags correlating values with the invocation that produced them
//! - Payloads carried by stage signals

mod payload;
mod tag;

pub use payload::{Completed, Envelope, Failed, Fault};
pub use tag::RunTag;

/// Bound for values that can flow through a pipeline.
///
/// Values are cloned when a signal fans out to several subscribers, and
/// stage invocations run as tokio tasks.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}
