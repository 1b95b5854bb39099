//! Turnstile - per-key fixed-window rate limiting for record pipelines.
//!
//! This crate decides, for every keyed event flowing through a pipeline,
//! whether it is admitted or dropped based on how many events with the same
//! key were already admitted in the current fixed time window. Counters live
//! behind a narrow [`store::CounterStore`] trait so the limiter can run on
//! top of any state store.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
