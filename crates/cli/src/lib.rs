//! hostlink command line client
//!
//! Thin layer over `hostlink-discovery` and `hostlink-runtime`: resolves a
//! host from flags or discovery, runs one session, and renders results.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
