//! Greenhouse-gas emissions for road freight transports.
//!
//! - [`domain`]: records, tiered calculation, phase aggregation, recompute state.
//! - [`infra`]: routing client, distance resolution, caches, transport registry.
//! - [`app`]: the recompute service tying them together.

pub mod app;
pub mod domain;
pub mod infra;
pub mod util;
