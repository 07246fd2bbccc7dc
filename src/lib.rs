//! Cache-aside image derivative proxy.
//!
//! Requests name a source image and a preset. The dispatcher redirects to a
//! materialized derivative when one is known, otherwise it redirects to the
//! original and materializes every preset in the background. The guardian
//! exposes eager materialization (PUT) and invalidation (DELETE).

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
