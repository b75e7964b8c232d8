//! Command implementations: initialize, baseline, migrate, validate, info.

pub mod baseline;
pub mod info;
pub mod initialize;
pub mod migrate;
pub mod validate;
