//! synthgate - parallel multi-model answer synthesis gateway
//!
//! This library provides the core functionality for the synthgate server:
//! configuration, combination selection, backend fan-out, and the
//! summarizer relay.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::Config;
pub use error::{Error, Result};
