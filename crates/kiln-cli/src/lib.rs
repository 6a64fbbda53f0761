//! Kiln CLI library.
//!
//! The `kiln` binary is a thin layer over this crate: argument parsing
//! ([`cli`]), configuration loading ([`config`]), target wiring
//! ([`project`]), the HTTP layer ([`server`]) and one module per command
//! ([`commands`]).

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod project;
pub mod server;
pub mod ui;
