//! Shared domain types for lectern.
//!
//! Everything the other crates agree on lives here: lecture artifacts,
//! the client wire protocol, analysis outputs, the shared error type,
//! and runtime configuration.

pub mod analysis;
pub mod config;
pub mod error;
pub mod events;
pub mod lecture;
