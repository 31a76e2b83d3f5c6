//! Process memory sampling and the memory circuit breaker.
//!
//! The breaker is an explicit object: create one per process, share it with
//! `Arc`, and call [`MemoryCircuitBreaker::checkpoint`] at the points where new
//! work is about to start.

pub use breaker::{BreakerThresholds, MemoryCircuitBreaker};
pub use error::{Error, Result};
pub use memory::{ManualProbe, MemoryProbe, MemorySample, SysinfoProbe};

mod breaker;
mod error;
pub mod memory;
