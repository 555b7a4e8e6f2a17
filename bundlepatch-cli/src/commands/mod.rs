//! CLI command implementations.

pub mod cache;
pub mod common;
pub mod plan;
pub mod publish;
pub mod sync;
