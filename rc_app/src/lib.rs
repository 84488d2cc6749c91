//! # rc_app
//!
//! Application wiring for the resilient HTTP client: tracing, configuration
//! and command-line parsing

pub mod cli;
pub mod config_loader;
pub mod probe;
pub mod tracing_setup;
