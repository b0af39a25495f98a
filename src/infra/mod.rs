//! I/O-facing pieces: routing client, caches, distance resolution, transport store.

pub mod cache;
pub mod distance;
pub mod registry;
pub mod routing;
