//! Command implementations.

pub mod call;
pub mod config;
pub mod serve;
pub mod watch;
