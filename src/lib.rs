//! particleflow: event-sourced market-state pipeline for crypto derivatives
//!
//! Raw venue messages are normalized, sequenced into an append-only raw log,
//! and folded into multi-scale features, a regime hierarchy, a potential
//! field over price and a Monte Carlo trajectory cone, emitted as snapshots.

pub mod pipeline;
pub mod streamer_core;
