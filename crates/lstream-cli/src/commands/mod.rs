//! Command implementations for lstream-cli

pub mod monitor;
pub mod send;

pub use monitor::monitor;
pub use send::send;
