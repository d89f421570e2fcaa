//! Router module for combination selection.
//!
//! Resolves which combination serves a request and which of its branches
//! (text or vision) applies, based on the message content.

mod registry;
pub mod vision;

pub use registry::{Combination, CombinationFlags, Registry, Selection};
