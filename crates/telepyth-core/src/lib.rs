//! Core domain + application logic for the telepyth notification bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the HTTP
//! listener live in adapter crates; they talk to the core through
//! [`chat::port::ChatPort`] and the plain types exported here.

pub mod audit;
pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod poller;
pub mod store;

pub use errors::{Error, Result};
