//! # valman-log-collection
//!
//! Durable capture of the supervised server's output plus low-frequency
//! batched fan-out to subscribers.

pub mod collector;

pub use collector::{LogSubscriber, ServerLogCollector};
