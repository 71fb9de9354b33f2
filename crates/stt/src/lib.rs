//! Streaming speech-to-text client.
//!
//! One duplex WebSocket per lecture session: audio chunks go upstream as
//! binary frames, transcript updates come back as JSON text frames and are
//! fanned out to an interim stream (every update) and an utterance stream
//! (finalized segments only).

pub mod client;

pub use client::{SttSession, SttStreams, TranscriptUpdate, Utterance};
