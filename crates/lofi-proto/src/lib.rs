//! Shared types for the lofi daemon and its clients: station registry,
//! wire protocol, shared state snapshot, configuration and platform paths.

pub mod config;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod state;
