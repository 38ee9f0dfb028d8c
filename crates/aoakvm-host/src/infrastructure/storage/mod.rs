//! Storage infrastructure: the TOML configuration file.
//!
//! The `config` sub-module reads the configuration from the platform config
//! directory (or an explicit path), fills in defaults for anything missing,
//! and converts it into the settings structs the application layer takes.

pub mod config;
