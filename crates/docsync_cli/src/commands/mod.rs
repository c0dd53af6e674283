//! CLI command implementations.

pub mod properties;
pub mod simulate;
