//! Domain layer types and invariants.

pub mod error;
pub mod presets;
pub mod source;
pub mod whitelist;
