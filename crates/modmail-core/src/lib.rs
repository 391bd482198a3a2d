//! Core domain + application logic for the modmail bot.
//!
//! This crate is framework-agnostic. Discord lives behind the `PlatformPort` trait,
//! implemented in the `modmail-discord` adapter crate.

pub mod app;
pub mod audit;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod notify;
pub mod registry;
pub mod relay;
pub mod risk;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
