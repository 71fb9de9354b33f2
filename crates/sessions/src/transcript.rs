//! Rolling transcript buffer for one session.
//!
//! The STT receiver is the only writer; the scheduler and the end-session
//! path read snapshots. The buffer is the whitespace-joined concatenation
//! of every finalized utterance, in arrival order.

use std::time::Instant;

use parking_lot::RwLock;

pub struct TranscriptBuffer {
    text: RwLock<String>,
    started: Instant,
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self {
            text: RwLock::new(String::new()),
            started: Instant::now(),
        }
    }

    /// Append a finalized utterance.
    pub fn push_final(&self, utterance: &str) {
        let mut text = self.text.write();
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(utterance);
    }

    /// Snapshot of the full transcript so far.
    pub fn full_transcript(&self) -> String {
        self.text.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.text.read().is_empty()
    }

    /// The last `n` characters of the transcript.
    pub fn context_tail(&self, n: usize) -> String {
        if n == 0 {
            return String::new();
        }
        let text = self.text.read();
        match text.char_indices().rev().nth(n - 1) {
            Some((start, _)) => text[start..].to_owned(),
            None => text.clone(),
        }
    }

    /// Whole seconds since the session started. The clock keeps advancing
    /// while the session is paused.
    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
