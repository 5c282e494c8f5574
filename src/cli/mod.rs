//! Command line entry point for the bgremove-server binary
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, CliBackend, CliFileReference, CliLogFormat, CliModel};
