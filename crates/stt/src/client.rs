//! Duplex STT connection — manages the WebSocket lifecycle, the audio
//! sender, and the transcript receiver for one session.
//!
//! Flow:
//! 1. `SttSession::connect` performs the handshake (bounded timeout) with
//!    connection parameters in the URL query and the API key as a bearer
//!    header.
//! 2. A sender task drains the audio channel into binary frames; a
//!    `finalize` sentinel flushes the upstream and closes the sink.
//! 3. A receiver task parses transcript frames. Finals are appended to the
//!    rolling transcript *before* publication, so the scheduler never sees
//!    an utterance the transcript doesn't contain yet.
//! 4. When the upstream stream closes (receive error, auth rejection, or a
//!    plain close), a closure signal fires so the session controller can
//!    tear the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use lectern_domain::config::SttConfig;
use lectern_domain::error::{Error, Result};
use lectern_sessions::transcript::TranscriptBuffer;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transcript update, interim or final.
#[derive(Debug, Clone)]
pub struct TranscriptUpdate {
    pub text: String,
    /// Not populated by the current upstream; kept for forward compatibility.
    pub speaker: Option<u32>,
    pub timestamp_seconds: u64,
    pub is_final: bool,
}

/// A finalized utterance.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub speaker: Option<u32>,
    pub timestamp_seconds: u64,
}

/// Receiver halves of the two output streams; the controller moves these
/// into its drain and scheduler tasks.
pub struct SttStreams {
    pub interim: mpsc::UnboundedReceiver<TranscriptUpdate>,
    pub utterances: mpsc::UnboundedReceiver<Utterance>,
    /// Resolves once the upstream stream closes, for any reason. The
    /// controller selects on this to end the session.
    pub closed: oneshot::Receiver<()>,
}

enum AudioFrame {
    Chunk(Bytes),
    Finalize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream transcript frame: `{"transcript": "...", "is_final": true}`.
/// `is_final` defaults to true when omitted.
#[derive(Debug, Deserialize)]
struct SttFrame {
    #[serde(default)]
    transcript: String,
    #[serde(default = "default_true")]
    is_final: bool,
}

fn default_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to a live STT connection. Owned by the session controller.
pub struct SttSession {
    lecture_id: String,
    audio_tx: mpsc::UnboundedSender<AudioFrame>,
    paused: AtomicBool,
    stopped: AtomicBool,
    sender_task: JoinHandle<()>,
    receiver_task: JoinHandle<()>,
}

impl SttSession {
    /// Connect to the upstream STT and spawn the sender/receiver tasks.
    ///
    /// Blocks until the WebSocket handshake completes or the configured
    /// connect timeout elapses.
    pub async fn connect(
        cfg: &SttConfig,
        lecture_id: &str,
        transcript: Arc<TranscriptBuffer>,
    ) -> Result<(Self, SttStreams)> {
        if cfg.api_key.is_empty() {
            tracing::warn!(
                lecture_id,
                "STT API key is missing; the upstream will likely reject the connection"
            );
        }

        let url = build_ws_url(cfg);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Stt(format!("invalid STT URL: {e}")))?;
        let auth = format!("Bearer {}", cfg.api_key)
            .parse()
            .map_err(|_| Error::Stt("API key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", auth);

        let connect = tokio_tungstenite::connect_async(request);
        let (ws, _response) =
            tokio::time::timeout(Duration::from_secs(cfg.connect_timeout_secs), connect)
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "STT handshake after {}s",
                        cfg.connect_timeout_secs
                    ))
                })?
                .map_err(|e| Error::Stt(format!("connect: {e}")))?;

        tracing::info!(lecture_id, url = %cfg.ws_url, "STT connection opened");

        let (sink, stream) = ws.split();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (interim_tx, interim_rx) = mpsc::unbounded_channel();
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let sender_task = tokio::spawn(run_sender(sink, audio_rx, lecture_id.to_owned()));
        let receiver_task = tokio::spawn(run_receiver(
            stream,
            transcript,
            interim_tx,
            utterance_tx,
            closed_tx,
            lecture_id.to_owned(),
        ));

        Ok((
            Self {
                lecture_id: lecture_id.to_owned(),
                audio_tx,
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                sender_task,
                receiver_task,
            },
            SttStreams {
                interim: interim_rx,
                utterances: utterance_rx,
                closed: closed_rx,
            },
        ))
    }

    /// Queue a raw audio chunk for the upstream. No-op when paused or
    /// stopped; a chunk the sender can no longer take is dropped.
    pub fn send_audio(&self, chunk: Bytes) {
        if self.paused.load(Ordering::Relaxed) || self.stopped.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.audio_tx.send(AudioFrame::Chunk(chunk));
    }

    /// Stop forwarding audio without tearing down the connection.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Request a finalize, close the connection, and join both tasks.
    pub async fn stop(self) {
        self.stopped.store(true, Ordering::Relaxed);
        let _ = self.audio_tx.send(AudioFrame::Finalize);
        let _ = self.sender_task.await;
        self.receiver_task.abort();
        let _ = self.receiver_task.await;
        tracing::info!(lecture_id = %self.lecture_id, "STT session stopped");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain queued audio into the socket. A single failed chunk closes the
/// sender; the session ends and the client reconnects.
async fn run_sender(
    mut sink: WsSink,
    mut audio_rx: mpsc::UnboundedReceiver<AudioFrame>,
    lecture_id: String,
) {
    while let Some(frame) = audio_rx.recv().await {
        match frame {
            AudioFrame::Chunk(chunk) => {
                if let Err(e) = sink.send(Message::Binary(chunk.to_vec())).await {
                    tracing::warn!(
                        lecture_id = %lecture_id,
                        error = %e,
                        "audio send failed; closing sender"
                    );
                    // Closing the socket ends the receiver too; the
                    // controller observes the stream closure.
                    let _ = sink.close().await;
                    return;
                }
            }
            AudioFrame::Finalize => {
                let finalize = serde_json::json!({ "type": "finalize" }).to_string();
                let _ = sink.send(Message::Text(finalize)).await;
                let _ = sink.close().await;
                return;
            }
        }
    }
}

/// Parse transcript frames and fan them out. Closing either output channel
/// (the session is tearing down) stops the receiver. However the receiver
/// ends, the closure signal fires.
async fn run_receiver(
    mut stream: WsStream,
    transcript: Arc<TranscriptBuffer>,
    interim_tx: mpsc::UnboundedSender<TranscriptUpdate>,
    utterance_tx: mpsc::UnboundedSender<Utterance>,
    closed_tx: oneshot::Sender<()>,
    lecture_id: String,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(lecture_id = %lecture_id, error = %e, "STT receive error");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(raw) => match String::from_utf8(raw) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: SttFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(
                    lecture_id = %lecture_id,
                    error = %e,
                    "ignoring unparseable STT frame"
                );
                continue;
            }
        };
        if frame.transcript.is_empty() {
            continue;
        }

        let timestamp_seconds = transcript.elapsed_seconds();
        let speaker = None;

        if frame.is_final {
            // The transcript must contain the utterance before the
            // scheduler can observe it.
            transcript.push_final(&frame.transcript);
            let sent = utterance_tx.send(Utterance {
                text: frame.transcript.clone(),
                speaker,
                timestamp_seconds,
            });
            if sent.is_err() {
                break;
            }
        }

        let sent = interim_tx.send(TranscriptUpdate {
            text: frame.transcript,
            speaker,
            timestamp_seconds,
            is_final: frame.is_final,
        });
        if sent.is_err() {
            break;
        }
    }
    let _ = closed_tx.send(());
    tracing::info!(lecture_id = %lecture_id, "STT receiver closed");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full connection URL with negotiated parameters in the query.
fn build_ws_url(cfg: &SttConfig) -> String {
    format!(
        "{}?language={}&encoding={}&sample_rate={}&word_timestamps={}",
        cfg.ws_url, cfg.language, cfg.encoding, cfg.sample_rate, cfg.word_timestamps
    )
}
