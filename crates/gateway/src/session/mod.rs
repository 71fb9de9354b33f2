//! Per-session WebSocket controller.
//!
//! One logical session per accept on `/ws/{lecture_id}`:
//!
//! 1. Fetch the session's term cache, create the transcript buffer, and
//!    connect the upstream STT.
//! 2. Demultiplex inbound frames — binary is audio, text is a JSON control
//!    message (`pause`, `resume`, `deep_research`, `end_session`).
//! 3. Fan every outbound event through one bounded channel drained by a
//!    single writer task, one JSON text frame per event.
//! 4. On client disconnect, upstream STT closure, or completion: stop
//!    background tasks, finalize the lecture, stop the STT, drop the
//!    registry entry.

pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use lectern_domain::events::{ClientCommand, SessionEvent};
use lectern_domain::lecture::{CardKind, LectureStatus};
use lectern_sessions::TranscriptBuffer;
use lectern_store::{ArtifactStore, NewCard};
use lectern_stt::{SttSession, SttStreams, TranscriptUpdate};

use crate::session::pipeline::PipelineScheduler;
use crate::state::AppState;

/// How often the rolling transcript is snapshotted to the store.
const TRANSCRIPT_SAVE_INTERVAL: Duration = Duration::from_secs(3);
/// Outbound event queue depth. Producers wait for capacity, which slows
/// the pipeline when the client reads slowly.
const OUTBOUND_QUEUE_DEPTH: usize = 256;
/// Grace period for the writer to flush queued events at teardown.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ws/{lecture_id} — upgrade to the session WebSocket.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, lecture_id))
}

async fn handle_session(socket: WebSocket, state: AppState, lecture_id: String) {
    tracing::info!(lecture_id = %lecture_id, "session connected");

    let (ws_sink, mut ws_stream) = socket.split();

    let transcript = Arc::new(TranscriptBuffer::new());
    let term_cache = state.registry.cache_for(&lecture_id);

    // ── Upstream STT ────────────────────────────────────────────────
    let stt = SttSession::connect(&state.config.stt, &lecture_id, transcript.clone()).await;
    let (stt, streams) = match stt {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(lecture_id = %lecture_id, error = %e, "STT connect failed; closing session");
            state.registry.drop_session(&lecture_id);
            return;
        }
    };
    let SttStreams {
        interim,
        utterances,
        mut closed,
    } = streams;

    set_status(&state, &lecture_id, LectureStatus::Active).await;

    // ── Outbound writer: the single serializing sink ────────────────
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(OUTBOUND_QUEUE_DEPTH);
    let writer = tokio::spawn(run_writer(ws_sink, event_rx, lecture_id.clone()));

    // ── Background tasks ────────────────────────────────────────────
    let drain = tokio::spawn(run_interim_drain(interim, event_tx.clone()));

    let scheduler = PipelineScheduler::new(
        lecture_id.clone(),
        state.analyzer.clone(),
        state.store.clone(),
        transcript.clone(),
        term_cache,
        event_tx.clone(),
    );
    let pipeline_task = tokio::spawn(scheduler.run(utterances));

    let saver = tokio::spawn(run_transcript_saver(
        state.store.clone(),
        transcript.clone(),
        lecture_id.clone(),
    ));

    // ── Inbound demux loop ──────────────────────────────────────────
    // A dead STT stream ends the session the same way a client
    // disconnect does.
    let mut finalized = false;
    loop {
        let msg = tokio::select! {
            inbound = ws_stream.next() => match inbound {
                Some(Ok(msg)) => msg,
                Some(Err(_)) | None => break,
            },
            _ = &mut closed => {
                tracing::error!(lecture_id = %lecture_id, "STT stream closed; ending session");
                break;
            }
        };

        match msg {
            Message::Binary(chunk) => stt.send_audio(Bytes::from(chunk)),
            Message::Text(text) => {
                let Ok(command) = serde_json::from_str::<ClientCommand>(&text) else {
                    tracing::debug!(lecture_id = %lecture_id, "ignoring malformed control message");
                    continue;
                };
                match command {
                    ClientCommand::Pause => {
                        stt.pause();
                        set_status(&state, &lecture_id, LectureStatus::Paused).await;
                    }
                    ClientCommand::Resume => {
                        stt.resume();
                        set_status(&state, &lecture_id, LectureStatus::Active).await;
                    }
                    ClientCommand::DeepResearch {
                        selected_text,
                        context,
                    } => {
                        if !selected_text.is_empty() {
                            tokio::spawn(run_user_research(
                                state.clone(),
                                lecture_id.clone(),
                                transcript.clone(),
                                event_tx.clone(),
                                selected_text,
                                context,
                            ));
                        }
                    }
                    ClientCommand::EndSession => {
                        end_session(&state, &lecture_id, &transcript, &event_tx).await;
                        finalized = true;
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Teardown ────────────────────────────────────────────────────
    drain.abort();
    pipeline_task.abort();
    saver.abort();

    if !finalized {
        // Disconnect path: persist what exists; the summary is not rewritten.
        let duration = transcript.elapsed_seconds();
        let full = transcript.full_transcript();
        let transcript_field = (!full.is_empty()).then_some(full);
        if let Err(e) = state
            .store
            .finalize_lecture(&lecture_id, duration, None, transcript_field)
            .await
        {
            tracing::error!(lecture_id = %lecture_id, error = %e, "finalize on disconnect failed");
        }
    }

    stt.stop().await;

    // The writer drains whatever is still queued once every sender is gone.
    drop(event_tx);
    let _ = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await;

    state.registry.drop_session(&lecture_id);
    tracing::info!(lecture_id = %lecture_id, "session cleaned up");
}

async fn set_status(state: &AppState, lecture_id: &str, status: LectureStatus) {
    if let Err(e) = state.store.update_status(lecture_id, status).await {
        tracing::warn!(lecture_id, status = status.as_str(), error = %e, "status update failed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain outbound events into the socket, one JSON text frame per event.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<SessionEvent>,
    lecture_id: String,
) {
    while let Some(event) = events.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(lecture_id = %lecture_id, error = %e, "failed to serialize outbound event");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            // Socket gone. The session tears down when the read half
            // observes the close.
            break;
        }
    }
}

/// Forward transcript updates to the client in arrival order.
async fn run_interim_drain(
    mut interim: mpsc::UnboundedReceiver<TranscriptUpdate>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(update) = interim.recv().await {
        let event = if update.is_final {
            SessionEvent::TranscriptFinal {
                text: update.text,
                speaker: update.speaker,
                timestamp_seconds: update.timestamp_seconds,
            }
        } else {
            SessionEvent::TranscriptInterim {
                text: update.text,
                speaker: update.speaker,
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

/// Snapshot the rolling transcript to the store on a fixed cadence.
async fn run_transcript_saver(
    store: Arc<ArtifactStore>,
    transcript: Arc<TranscriptBuffer>,
    lecture_id: String,
) {
    let mut interval = tokio::time::interval(TRANSCRIPT_SAVE_INTERVAL);
    // The first tick completes immediately; skip it.
    interval.tick().await;
    loop {
        interval.tick().await;
        let full = transcript.full_transcript();
        if full.is_empty() {
            continue;
        }
        if let Err(e) = store.update_transcript(&lecture_id, &full).await {
            tracing::warn!(lecture_id = %lecture_id, error = %e, "transcript snapshot failed");
        }
    }
}

/// One-shot user-triggered research job: announce, research, persist, emit.
///
/// Runs concurrently with the scheduler and does not touch its research
/// throttle or dedup set.
async fn run_user_research(
    state: AppState,
    lecture_id: String,
    transcript: Arc<TranscriptBuffer>,
    events: mpsc::Sender<SessionEvent>,
    selected_text: String,
    context: String,
) {
    let started = events
        .send(SessionEvent::DeepResearchStart {
            selected_text: selected_text.clone(),
        })
        .await;
    if started.is_err() {
        return;
    }

    let draft = match state.analyzer.deep_research(&selected_text, &context).await {
        Ok(Some(draft)) => draft,
        Ok(None) => {
            tracing::info!(lecture_id = %lecture_id, selected_text = %selected_text, "deep research produced no card");
            return;
        }
        Err(e) => {
            tracing::warn!(lecture_id = %lecture_id, error = %e, "deep research failed");
            return;
        }
    };

    let card = match state
        .store
        .insert_card(NewCard {
            lecture_id: lecture_id.clone(),
            kind: CardKind::DeepResearch,
            term: draft.term,
            content: draft.content,
            citations: draft.citations,
            badge: draft.badge,
            lecture_timestamp_seconds: transcript.elapsed_seconds(),
        })
        .await
    {
        Ok(card) => card,
        Err(e) => {
            tracing::error!(lecture_id = %lecture_id, error = %e, "persisting research card failed");
            return;
        }
    };

    let _ = events.send(SessionEvent::DeepResearchResult { card }).await;
}

/// Finalize the lecture: duration, final summary, completed status. A
/// summary that fails to generate is simply absent.
async fn end_session(
    state: &AppState,
    lecture_id: &str,
    transcript: &Arc<TranscriptBuffer>,
    events: &mpsc::Sender<SessionEvent>,
) {
    let duration = transcript.elapsed_seconds();
    let full = transcript.full_transcript();

    let summary = match state.analyzer.summarize(&full).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(lecture_id, error = %e, "final summary failed");
            None
        }
    };

    let transcript_field = (!full.is_empty()).then_some(full);
    if let Err(e) = state
        .store
        .finalize_lecture(lecture_id, duration, summary.clone(), transcript_field)
        .await
    {
        tracing::error!(lecture_id, error = %e, "finalize failed");
    }

    if let Some(summary) = summary {
        let _ = events.send(SessionEvent::SummaryUpdate { summary }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_state, FakeAnalyzer};

    #[tokio::test]
    async fn user_research_emits_start_then_persisted_result() {
        let (state, _dir) = test_state(FakeAnalyzer::default()).await;
        let lecture = state.store.create_lecture("Quantum").await.unwrap();
        let transcript = Arc::new(TranscriptBuffer::new());
        let (event_tx, mut event_rx) = mpsc::channel(16);

        run_user_research(
            state.clone(),
            lecture.id.clone(),
            transcript,
            event_tx,
            "Shor's algorithm".into(),
            "quantum".into(),
        )
        .await;

        let first = event_rx.recv().await.unwrap();
        assert!(matches!(
            &first,
            SessionEvent::DeepResearchStart { selected_text } if selected_text == "Shor's algorithm"
        ));

        let card = match event_rx.recv().await.unwrap() {
            SessionEvent::DeepResearchResult { card } => card,
            other => panic!("expected deep_research_result, got {other:?}"),
        };
        assert_eq!(card.term, "Shor's algorithm");
        assert_eq!(card.kind, CardKind::DeepResearch);

        // The emitted card id resolves through the store.
        let fetched = state.store.get_card(&card.id).await.unwrap().unwrap();
        assert_eq!(fetched.term, "Shor's algorithm");
    }

    #[tokio::test]
    async fn end_session_finalizes_and_emits_summary() {
        let (state, _dir) = test_state(FakeAnalyzer::default()).await;
        let lecture = state.store.create_lecture("Quantum").await.unwrap();
        let transcript = Arc::new(TranscriptBuffer::new());
        transcript.push_final("a short transcript");
        let (event_tx, mut event_rx) = mpsc::channel(16);

        end_session(&state, &lecture.id, &transcript, &event_tx).await;

        let event = event_rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::SummaryUpdate { .. }));

        let detail = state.store.get_lecture(&lecture.id).await.unwrap().unwrap();
        assert_eq!(detail.lecture.status, LectureStatus::Completed);
        assert_eq!(
            detail.lecture.transcript.as_deref(),
            Some("a short transcript")
        );
        assert!(detail.lecture.summary.is_some());
    }
}
