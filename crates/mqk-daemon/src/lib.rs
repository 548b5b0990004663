//! mqk-daemon library target: the relay process (SPEC_FULL.md §4.h).
//!
//! Exposes `RelayState` and the subscription handlers for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod relay;
pub mod state;
