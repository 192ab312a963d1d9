//! CLI commands

pub mod analyze;
pub mod build;
pub mod deploy;
pub mod push;
pub mod unpack;
