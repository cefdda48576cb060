//! CL8Y Lock Relayer - Library interface
//!
//! Relays `Locked` events from chain A to `relayLock` on chain B and
//! `Unlocked` events from chain B to `relayUnlock` on chain A, at most once per
//! event and surviving restarts. Re-exports internal modules for use in
//! integration tests.

pub mod attestor;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod processor;
pub mod scheduler;
pub mod server;
pub mod types;
