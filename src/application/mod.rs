//! Derivative pipeline: serve decision, materialization, invalidation.

pub mod aggregate;
pub mod derivatives;
pub mod error;
pub mod inflight;
pub mod invalidate;
pub mod materialize;
pub mod ports;
