//! DocGate Common - Shared utilities and types
//!
//! This crate provides functionality used by every DocGate component:
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - Logging initialization

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{Error, ProtocolError, Result};
