//! # valman-process
//!
//! Cross-platform OS process primitives: finding a process by name and
//! delivering an interrupt. These are the only two things the supervisor
//! needs from the operating system.

pub mod find;
pub mod signal;

pub use find::find_process;
pub use signal::interrupt;
