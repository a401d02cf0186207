//! # valman-supervisor
//!
//! Lifecycle control of the dedicated server process: bounded-retry start
//! and stop, sampled crash detection, automatic restarts, and launch
//! artifact generation.

pub mod launcher;
pub mod runner;
pub mod supervisor;

pub use launcher::{native_plan, LaunchPlan};
pub use runner::{NativeRunner, ProcessRunner, ServerHandle};
pub use supervisor::{ProcessSupervisor, SupervisorOptions};
