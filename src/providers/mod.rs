//! Concrete backends implementing the engine's pluggable traits.

pub mod cache;
