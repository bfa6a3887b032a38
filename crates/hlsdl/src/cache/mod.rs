//! In-memory caches shared across pipeline runs.

pub mod keys;

pub use keys::KeyCache;
