//! Shared test fixtures: a scripted analyzer and app-state construction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use lectern_analysis::Analyzer;
use lectern_domain::analysis::{Analysis, CardDraft, TermHit};
use lectern_domain::config::Config;
use lectern_domain::error::Result;
use lectern_domain::lecture::BadgeKind;
use lectern_sessions::SessionRegistry;
use lectern_store::ArtifactStore;

use crate::state::AppState;

/// An analyzer with scripted `analyze` replies and canned definitions.
///
/// `analyze` pops from the script; when the script is empty it returns an
/// empty analysis. Every call records its input so tests can assert what
/// the scheduler actually sent.
#[derive(Default)]
pub(crate) struct FakeAnalyzer {
    pub script: Mutex<VecDeque<Result<Analysis>>>,
    pub analyze_inputs: Mutex<Vec<String>>,
    pub analyze_calls: AtomicUsize,
    pub research_topics: Mutex<Vec<String>>,
}

impl FakeAnalyzer {
    pub fn scripted(replies: Vec<Result<Analysis>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<Analysis> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.analyze_inputs.lock().push(transcript.to_owned());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Analysis::default()))
    }

    async fn define_batch(&self, terms: &[TermHit], _context_tail: &str) -> Vec<CardDraft> {
        terms
            .iter()
            .map(|hit| CardDraft {
                term: hit.term.clone(),
                content: format!("definition of {}", hit.term),
                citations: Vec::new(),
                badge: hit.kind.badge(),
            })
            .collect()
    }

    async fn deep_research(&self, topic: &str, _context: &str) -> Result<Option<CardDraft>> {
        self.research_topics.lock().push(topic.to_owned());
        Ok(Some(CardDraft {
            term: topic.to_owned(),
            content: format!("research on {topic}"),
            citations: Vec::new(),
            badge: BadgeKind::Concept,
        }))
    }

    async fn summarize(&self, _transcript: &str) -> Result<Option<String>> {
        Ok(Some("a final summary".into()))
    }
}

/// App state over a throwaway database.
pub(crate) async fn test_state(analyzer: FakeAnalyzer) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ArtifactStore::open(&dir.path().join("test.db")).unwrap());
    let state = AppState {
        config: Arc::new(Config::default()),
        store,
        analyzer: Arc::new(analyzer),
        registry: Arc::new(SessionRegistry::new()),
    };
    (state, dir)
}
