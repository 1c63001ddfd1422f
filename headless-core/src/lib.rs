//! Headless Core - Shared protocol types
//!
//! This crate contains the types exchanged between `headlessd` and the
//! observers that drive it (a UI shell, the `headlessd` CLI client) over the
//! management socket: commands, responses, lifecycle notifications and the
//! projected service configuration.

mod config;
mod protocol;

pub use config::*;
pub use protocol::*;
