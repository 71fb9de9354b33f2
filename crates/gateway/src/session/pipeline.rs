//! Throttled analysis pipeline, one per session.
//!
//! Consumes finalized utterances, batches them between invocations, and
//! drives the analysis adapter: topic updates, takeaways, rolling summary,
//! auto-defined term cards, and throttled deep research. A failed
//! invocation is retried after a backoff with its input preserved, merged
//! with whatever arrived in the meantime.
//!
//! Within one invocation, events are emitted in a fixed order (topic →
//! takeaway → summary → cards → research) and every artifact is persisted
//! before its event is sent. The scheduler itself is single-threaded; two
//! invocations never overlap.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use lectern_analysis::Analyzer;
use lectern_domain::analysis::{Analysis, TermHit};
use lectern_domain::error::Result;
use lectern_domain::events::SessionEvent;
use lectern_domain::lecture::CardKind;
use lectern_sessions::term_cache::{normalize_term, TermCache};
use lectern_sessions::TranscriptBuffer;
use lectern_store::{ArtifactStore, NewCard, NewTakeaway};
use lectern_stt::Utterance;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tunables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimum spacing between analysis invocations.
const MIN_PIPELINE_INTERVAL: Duration = Duration::from_secs(20);
/// Delay before a failed invocation is retried.
const RETRY_BACKOFF: Duration = Duration::from_secs(20);
/// Minimum spacing between scheduler-initiated research calls.
const DEEP_RESEARCH_INTERVAL: Duration = Duration::from_secs(30);
/// Topics above this emphasis outrank individual terms as research
/// candidates.
const EMPHASIS_THRESHOLD_FOR_RESEARCH: f32 = 0.6;
/// Bounded wait on the utterance stream per loop turn.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Analysis input when a trigger fires on an empty buffer.
const FALLBACK_CONTEXT_CHARS: usize = 300;
/// Context handed to definition and research prompts.
const PROMPT_CONTEXT_CHARS: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PipelineScheduler {
    lecture_id: String,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<ArtifactStore>,
    transcript: Arc<TranscriptBuffer>,
    cache: Arc<TermCache>,
    events: mpsc::Sender<SessionEvent>,

    buffer: Vec<String>,
    /// Combined input preserved across a retry window, so a failed
    /// invocation does not lose its content.
    pending: Option<String>,
    last_process: Instant,
    last_pipeline: Instant,
    retry_pending: bool,
    retry_after: Instant,
    last_deep_research: Option<Instant>,
    /// Session-wide dedup of research candidates, by normalized term.
    researched: HashSet<String>,
}

impl PipelineScheduler {
    pub fn new(
        lecture_id: String,
        analyzer: Arc<dyn Analyzer>,
        store: Arc<ArtifactStore>,
        transcript: Arc<TranscriptBuffer>,
        cache: Arc<TermCache>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let now = Instant::now();
        Self {
            lecture_id,
            analyzer,
            store,
            transcript,
            cache,
            events,
            buffer: Vec::new(),
            pending: None,
            last_process: now,
            // Only the process cooldown gates the first invocation.
            last_pipeline: now.checked_sub(MIN_PIPELINE_INTERVAL).unwrap_or(now),
            retry_pending: false,
            retry_after: now,
            last_deep_research: None,
            researched: HashSet::new(),
        }
    }

    /// Drive the scheduler until the utterance stream closes.
    pub async fn run(mut self, mut utterances: mpsc::UnboundedReceiver<Utterance>) {
        loop {
            match tokio::time::timeout(POLL_TIMEOUT, utterances.recv()).await {
                Ok(Some(utterance)) => {
                    if !utterance.text.trim().is_empty() {
                        self.buffer.push(utterance.text);
                    }
                }
                // Stream closed: the STT is gone and the session is ending.
                Ok(None) => break,
                // Poll timeout — fall through to the trigger check.
                Err(_) => {}
            }
            self.tick(Instant::now()).await;
        }
        tracing::debug!(lecture_id = %self.lecture_id, "pipeline scheduler stopped");
    }

    /// Evaluate triggers and run one pipeline invocation when one fires.
    async fn tick(&mut self, now: Instant) {
        let cooled_down = now.duration_since(self.last_process) >= MIN_PIPELINE_INTERVAL
            && now.duration_since(self.last_pipeline) >= MIN_PIPELINE_INTERVAL;
        let should_process = !self.buffer.is_empty() && cooled_down;
        let should_retry = self.retry_pending && now >= self.retry_after;

        if !(should_process || should_retry) {
            return;
        }

        let combined = self.take_combined();
        self.last_process = now;
        self.last_pipeline = now;

        match self.run_pipeline(&combined).await {
            Ok(()) => {
                self.retry_pending = false;
                self.pending = None;
            }
            Err(e) => {
                tracing::warn!(
                    lecture_id = %self.lecture_id,
                    error = %e,
                    "analysis failed; retrying after backoff"
                );
                self.retry_pending = true;
                self.retry_after = now + RETRY_BACKOFF;
                self.pending = Some(combined);
            }
        }
    }

    /// Merge the preserved input from a failed invocation with the buffered
    /// utterances; fall back to the transcript tail when both are empty.
    fn take_combined(&mut self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(pending) = self.pending.take() {
            parts.push(pending);
        }
        parts.append(&mut self.buffer);
        if parts.is_empty() {
            self.transcript.context_tail(FALLBACK_CONTEXT_CHARS)
        } else {
            parts.join(" ")
        }
    }

    /// One end-to-end pipeline invocation over `combined`.
    async fn run_pipeline(&mut self, combined: &str) -> Result<()> {
        let analysis = self.analyzer.analyze(combined).await?;

        let ts = self.transcript.elapsed_seconds();
        let tail = self.transcript.context_tail(PROMPT_CONTEXT_CHARS);

        if let Some(topic) = &analysis.topic {
            let _ = self
                .events
                .send(SessionEvent::TopicUpdate {
                    topic: topic.clone(),
                    emphasis_level: analysis.emphasis,
                })
                .await;
        }

        if let Some(takeaway) = &analysis.takeaway {
            let inserted = self
                .store
                .insert_takeaway(NewTakeaway {
                    lecture_id: self.lecture_id.clone(),
                    text: takeaway.clone(),
                    lecture_timestamp_seconds: ts,
                })
                .await;
            match inserted {
                Ok(takeaway) => {
                    let _ = self.events.send(SessionEvent::NewTakeaway { takeaway }).await;
                }
                Err(e) => {
                    tracing::warn!(lecture_id = %self.lecture_id, error = %e, "takeaway insert failed")
                }
            }
        }

        if let Some(summary) = &analysis.summary {
            match self.store.update_summary(&self.lecture_id, summary).await {
                Ok(()) => {
                    let _ = self
                        .events
                        .send(SessionEvent::SummaryUpdate {
                            summary: summary.clone(),
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(lecture_id = %self.lecture_id, error = %e, "summary update failed")
                }
            }
        }

        if !analysis.terms.is_empty() {
            let term_strs: Vec<&str> = analysis.terms.iter().map(|t| t.term.as_str()).collect();
            let fresh = self.cache.filter_new(&term_strs);
            // One reply can repeat a term under different spellings; keep
            // the first of each normalized form.
            let mut seen = HashSet::new();
            let new_terms: Vec<TermHit> = analysis
                .terms
                .iter()
                .filter(|hit| fresh.iter().any(|f| *f == hit.term))
                .filter(|hit| seen.insert(normalize_term(&hit.term)))
                .cloned()
                .collect();

            if !new_terms.is_empty() {
                let drafts = self.analyzer.define_batch(&new_terms, &tail).await;
                for draft in drafts {
                    self.cache.put(&draft.term, draft.clone());
                    let inserted = self
                        .store
                        .insert_card(NewCard {
                            lecture_id: self.lecture_id.clone(),
                            kind: CardKind::AutoDefine,
                            term: draft.term,
                            content: draft.content,
                            citations: draft.citations,
                            badge: draft.badge,
                            lecture_timestamp_seconds: ts,
                        })
                        .await;
                    match inserted {
                        Ok(card) => {
                            let _ = self.events.send(SessionEvent::NewCard { card }).await;
                        }
                        Err(e) => {
                            tracing::warn!(lecture_id = %self.lecture_id, error = %e, "card insert failed")
                        }
                    }
                }
            }
        }

        self.maybe_deep_research(&analysis, ts, &tail).await;

        Ok(())
    }

    /// Throttled research on the most promising unexplored candidate.
    async fn maybe_deep_research(&mut self, analysis: &Analysis, ts: u64, tail: &str) {
        let now = Instant::now();
        if let Some(last) = self.last_deep_research {
            if now.duration_since(last) < DEEP_RESEARCH_INTERVAL {
                return;
            }
        }

        // Candidates in priority order: a strongly emphasized topic first,
        // then terms, longest (most specific) first.
        let mut candidates: Vec<&str> = Vec::new();
        if analysis.emphasis > EMPHASIS_THRESHOLD_FOR_RESEARCH {
            if let Some(topic) = &analysis.topic {
                candidates.push(topic.as_str());
            }
        }
        let mut terms: Vec<&str> = analysis.terms.iter().map(|t| t.term.as_str()).collect();
        terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
        candidates.extend(terms);

        let target = candidates
            .into_iter()
            .find(|c| !self.researched.contains(&normalize_term(c)));
        let Some(target) = target else {
            return;
        };
        let target = target.to_owned();

        // The throttle clock and dedup set advance whether or not the call
        // succeeds; a failing target is not retried.
        self.last_deep_research = Some(now);
        self.researched.insert(normalize_term(&target));

        let draft = match self.analyzer.deep_research(&target, tail).await {
            Ok(Some(draft)) => draft,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(
                    lecture_id = %self.lecture_id,
                    topic = %target,
                    error = %e,
                    "deep research failed"
                );
                return;
            }
        };

        let inserted = self
            .store
            .insert_card(NewCard {
                lecture_id: self.lecture_id.clone(),
                kind: CardKind::DeepResearch,
                term: draft.term,
                content: draft.content,
                citations: draft.citations,
                badge: draft.badge,
                lecture_timestamp_seconds: ts,
            })
            .await;
        match inserted {
            Ok(card) => {
                let _ = self
                    .events
                    .send(SessionEvent::DeepResearchResult { card })
                    .await;
            }
            Err(e) => {
                tracing::warn!(lecture_id = %self.lecture_id, error = %e, "research card insert failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use lectern_domain::analysis::TermKind;
    use lectern_domain::error::Error;

    use crate::testing::FakeAnalyzer;

    struct Harness {
        scheduler: PipelineScheduler,
        events: mpsc::Receiver<SessionEvent>,
        analyzer: Arc<FakeAnalyzer>,
        store: Arc<ArtifactStore>,
        transcript: Arc<TranscriptBuffer>,
        _dir: tempfile::TempDir,
    }

    async fn harness(replies: Vec<Result<Analysis>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(&dir.path().join("test.db")).unwrap());
        let lecture = store.create_lecture("Test Lecture").await.unwrap();
        let analyzer = Arc::new(FakeAnalyzer::scripted(replies));
        let transcript = Arc::new(TranscriptBuffer::new());
        let cache = Arc::new(TermCache::new());
        let (events_tx, events_rx) = mpsc::channel(64);

        let scheduler = PipelineScheduler::new(
            lecture.id,
            analyzer.clone(),
            store.clone(),
            transcript.clone(),
            cache,
            events_tx,
        );
        Harness {
            scheduler,
            events: events_rx,
            analyzer,
            store,
            transcript,
            _dir: dir,
        }
    }

    fn analysis(
        topic: Option<&str>,
        emphasis: f32,
        terms: &[&str],
        takeaway: Option<&str>,
        summary: Option<&str>,
    ) -> Analysis {
        Analysis {
            terms: terms
                .iter()
                .map(|t| TermHit {
                    term: (*t).to_owned(),
                    kind: TermKind::Concept,
                })
                .collect(),
            topic: topic.map(str::to_owned),
            emphasis,
            takeaway: takeaway.map(str::to_owned),
            summary: summary.map(str::to_owned),
        }
    }

    fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_throttled_to_one_invocation_per_window() {
        let mut h = harness(vec![Ok(analysis(
            Some("Attention"),
            0.5,
            &["softmax"],
            None,
            None,
        ))])
        .await;

        for i in 0..5 {
            h.scheduler.buffer.push(format!("utterance {i}"));
        }

        // Inside the cooldown nothing fires.
        h.scheduler.tick(Instant::now()).await;
        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 0);

        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;
        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 1);
        assert!(h.scheduler.buffer.is_empty());

        // The whole batch went into one invocation.
        let input = h.analyzer.analyze_inputs.lock()[0].clone();
        assert!(input.starts_with("utterance 0"));
        assert!(input.ends_with("utterance 4"));

        // New content inside the next window does not fire again.
        h.scheduler.buffer.push("utterance 5".into());
        h.scheduler.tick(Instant::now()).await;
        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 1);

        let events = drain(&mut h.events);
        let topic_updates = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TopicUpdate { .. }))
            .count();
        assert_eq!(topic_updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_define_emits_each_term_once_per_session() {
        let mut h = harness(vec![
            Ok(analysis(None, 0.5, &["Transformer"], None, None)),
            Ok(analysis(None, 0.5, &["Transformer"], None, None)),
        ])
        .await;

        h.scheduler.buffer.push("Discuss the Transformer architecture".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        h.scheduler.buffer.push("Discuss the Transformer architecture".into());
        advance(Duration::from_secs(25)).await;
        h.scheduler.tick(Instant::now()).await;

        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 2);

        let events = drain(&mut h.events);
        let defined: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::NewCard { card } => Some(card),
                _ => None,
            })
            .collect();
        assert_eq!(defined.len(), 1);
        assert_eq!(defined[0].term, "Transformer");
        assert_eq!(defined[0].kind, CardKind::AutoDefine);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_terms_within_one_reply_define_once() {
        let mut h = harness(vec![Ok(analysis(
            None,
            0.5,
            &["Transformer", "  transformer ", "TRANSFORMER"],
            None,
            None,
        ))])
        .await;

        h.scheduler.buffer.push("Discuss the Transformer architecture".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        let defined: Vec<_> = drain(&mut h.events)
            .iter()
            .filter_map(|e| match e {
                SessionEvent::NewCard { card } => Some(card.term.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(defined, vec!["Transformer".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_invocation_retries_with_preserved_input() {
        let mut h = harness(vec![
            Err(Error::Llm("upstream flaked".into())),
            Ok(analysis(Some("Recovery"), 0.5, &[], None, None)),
        ])
        .await;

        h.scheduler.buffer.push("the transformer architecture".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        // The failure emits nothing and arms the retry.
        assert!(drain(&mut h.events).is_empty());
        assert!(h.scheduler.retry_pending);

        advance(RETRY_BACKOFF).await;
        h.scheduler.tick(Instant::now()).await;

        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 2);
        let inputs = h.analyzer.analyze_inputs.lock().clone();
        // The retry re-analyzes the exact content the failure consumed.
        assert_eq!(inputs[1], inputs[0]);
        assert!(!h.scheduler.retry_pending);

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::TopicUpdate { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_merges_newly_buffered_utterances() {
        let mut h = harness(vec![
            Err(Error::Llm("upstream flaked".into())),
            Ok(analysis(None, 0.5, &[], None, None)),
        ])
        .await;

        h.scheduler.buffer.push("part one".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        h.scheduler.buffer.push("part two".into());
        advance(RETRY_BACKOFF).await;
        h.scheduler.tick(Instant::now()).await;

        let inputs = h.analyzer.analyze_inputs.lock().clone();
        assert_eq!(inputs[1], "part one part two");
    }

    #[tokio::test(start_paused = true)]
    async fn take_combined_falls_back_to_the_context_tail() {
        let mut h = harness(vec![]).await;
        h.transcript.push_final("tail content");
        assert_eq!(h.scheduler.take_combined(), "tail content");
    }

    #[tokio::test(start_paused = true)]
    async fn research_candidates_deduplicate_by_normalized_term() {
        let mut h = harness(vec![
            Ok(analysis(Some("Quantum Error Correction"), 0.9, &[], None, None)),
            Ok(analysis(
                Some("quantum  error correction"),
                0.9,
                &["syndrome measurement"],
                None,
                None,
            )),
            Ok(analysis(
                Some("QUANTUM ERROR CORRECTION"),
                0.9,
                &["Syndrome Measurement"],
                None,
                None,
            )),
        ])
        .await;

        for _ in 0..3 {
            h.scheduler.buffer.push("more lecture content".into());
            advance(Duration::from_secs(31)).await;
            h.scheduler.tick(Instant::now()).await;
        }
        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 3);

        let topics = h.analyzer.research_topics.lock().clone();
        // Second invocation skips the already-researched topic and takes the
        // term; the third finds nothing new.
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0], "Quantum Error Correction");
        assert_eq!(topics[1], "syndrome measurement");

        let normalized: std::collections::HashSet<String> =
            topics.iter().map(|t| normalize_term(t)).collect();
        assert_eq!(normalized.len(), topics.len());
    }

    #[tokio::test(start_paused = true)]
    async fn research_is_throttled_between_invocations() {
        let mut h = harness(vec![
            Ok(analysis(Some("First Topic"), 0.9, &[], None, None)),
            Ok(analysis(Some("Second Topic"), 0.9, &[], None, None)),
        ])
        .await;

        h.scheduler.buffer.push("content".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        // 25s later the pipeline may run again, but research is still
        // inside its 30s window.
        h.scheduler.buffer.push("content".into());
        advance(Duration::from_secs(25)).await;
        h.scheduler.tick(Instant::now()).await;

        assert_eq!(h.analyzer.analyze_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.analyzer.research_topics.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn artifacts_resolve_through_the_store_before_their_events() {
        let mut h = harness(vec![Ok(analysis(
            Some("Topic"),
            0.5,
            &["qubit"],
            Some("Qubits decohere."),
            Some("We covered qubits."),
        ))])
        .await;

        h.scheduler.buffer.push("content".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        let events = drain(&mut h.events);
        for event in &events {
            match event {
                SessionEvent::NewCard { card } | SessionEvent::DeepResearchResult { card } => {
                    let fetched = h.store.get_card(&card.id).await.unwrap();
                    assert!(fetched.is_some(), "card {} not persisted", card.id);
                }
                SessionEvent::NewTakeaway { takeaway } => {
                    let detail = h
                        .store
                        .get_lecture(&takeaway.lecture_id)
                        .await
                        .unwrap()
                        .unwrap();
                    assert!(detail.takeaways.iter().any(|t| t.id == takeaway.id));
                }
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn events_within_one_invocation_keep_pipeline_order() {
        let mut h = harness(vec![Ok(analysis(
            Some("Topic"),
            0.5,
            &["qubit"],
            Some("Takeaway."),
            Some("Summary."),
        ))])
        .await;

        h.scheduler.buffer.push("content".into());
        advance(MIN_PIPELINE_INTERVAL).await;
        h.scheduler.tick(Instant::now()).await;

        let kinds: Vec<&'static str> = drain(&mut h.events)
            .iter()
            .map(|e| match e {
                SessionEvent::TopicUpdate { .. } => "topic",
                SessionEvent::NewTakeaway { .. } => "takeaway",
                SessionEvent::SummaryUpdate { .. } => "summary",
                SessionEvent::NewCard { .. } => "card",
                SessionEvent::DeepResearchResult { .. } => "research",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["topic", "takeaway", "summary", "card", "research"]
        );
    }
}
