//! Shared building blocks for the kura crates: filesystem layout,
//! JSON persistence and the machine-readable error vocabulary.

pub mod error;
pub mod paths;
pub mod persist;
