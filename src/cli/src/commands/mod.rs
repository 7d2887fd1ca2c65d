//! Subcommand implementations.

pub mod config;
pub mod health;
pub mod job;
pub mod lanes;
pub mod submit;
