//! In-memory session state for lectern.
//!
//! One live lecture session owns a rolling transcript buffer, an
//! elapsed-seconds clock, and a bounded cache of already-defined terms.
//! The process-wide [`SessionRegistry`] hands out per-session caches and
//! drops them when the session ends.

pub mod registry;
pub mod term_cache;
pub mod transcript;

pub use registry::SessionRegistry;
pub use term_cache::{normalize_term, TermCache};
pub use transcript::TranscriptBuffer;
