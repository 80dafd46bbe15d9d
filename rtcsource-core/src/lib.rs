//! # rtcsource core
//!
//! Process-level primitives shared by every rtcsource media source: the explicit
//! [`RuntimeContext`] and the single-writer [`TaskQueue`] used as a source's control
//! queue.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod queue;
pub mod runtime;

// Re-export main types
pub use error::{CoreError, CoreResult};
pub use queue::TaskQueue;
pub use runtime::{RuntimeConfig, RuntimeContext};
