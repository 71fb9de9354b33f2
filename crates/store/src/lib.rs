//! Durable storage for lecture artifacts.
//!
//! SQLite behind an r2d2 pool; every blocking call runs on the blocking
//! thread pool so the async runtime stays unblocked. Cards and takeaways
//! cascade-delete with their lecture.

pub mod schema;
mod store;

pub use store::{ArtifactStore, LecturePatch, NewCard, NewTakeaway};
