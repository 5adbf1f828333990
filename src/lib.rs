//! Trace driver for the `salloc` allocators.
//!
//! Traces are parsed with [`Trace`] and replayed against any [`salloc::HeapAllocator`] with
//! [`replay`], which validates payload contents, alignment and overlap after every request.

pub mod replay;
pub mod trace;

pub use replay::{replay, ReplayError, ReplayOptions, ReplayReport};
pub use trace::{Request, Trace, TraceError};
