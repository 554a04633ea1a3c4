//! # tvremote-cli
//!
//! Configuration and session helpers behind the `tvremote` binary.

pub mod config;
pub mod session;
