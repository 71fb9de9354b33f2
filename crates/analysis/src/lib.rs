//! LLM-backed analysis for lectern.
//!
//! The [`Analyzer`] trait is the seam the pipeline scheduler talks to; the
//! [`LlmAnalyzer`] implementation owns all prompting and response parsing,
//! so callers never see raw model text.

pub mod adapter;
pub mod client;

pub use adapter::{Analyzer, LlmAnalyzer};
pub use client::ChatClient;
