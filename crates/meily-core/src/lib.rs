//! Core domain and application logic for the Meily shop bot.
//!
//! This crate is framework-agnostic. Telegram, SQLite and PDF extraction live behind
//! ports (traits) implemented in adapter crates.

pub mod broadcast;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod lottery;
pub mod messaging;
pub mod ports;
pub mod receipt;
pub mod records;
pub mod state;
pub mod texts;

pub use errors::{Error, Result};
