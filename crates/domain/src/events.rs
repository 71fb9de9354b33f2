//! Wire messages for the client WebSocket.
//!
//! Inbound text frames parse into [`ClientCommand`]; everything the session
//! pushes back to the client is a [`SessionEvent`], serialized as one JSON
//! text frame per event with a `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::lecture::{Card, Takeaway};

/// Inbound control messages. Binary frames (audio) bypass this entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Pause,
    Resume,
    DeepResearch {
        selected_text: String,
        #[serde(default)]
        context: String,
    },
    EndSession,
}

/// Outbound session events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TranscriptInterim {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<u32>,
    },
    TranscriptFinal {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<u32>,
        timestamp_seconds: u64,
    },
    NewCard {
        card: Card,
    },
    DeepResearchStart {
        selected_text: String,
    },
    DeepResearchResult {
        card: Card,
    },
    NewTakeaway {
        takeaway: Takeaway,
    },
    SummaryUpdate {
        summary: String,
    },
    TopicUpdate {
        topic: String,
        emphasis_level: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"pause"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Pause));

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"end_session"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::EndSession));
    }

    #[test]
    fn parses_deep_research_with_optional_context() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"deep_research","selected_text":"Shor's algorithm","context":"quantum"}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::DeepResearch {
                selected_text,
                context,
            } => {
                assert_eq!(selected_text, "Shor's algorithm");
                assert_eq!(context, "quantum");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"deep_research","selected_text":"RSA"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::DeepResearch { context, .. } if context.is_empty()));
    }

    #[test]
    fn unknown_command_types_fail_to_parse() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>(r#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn topic_update_wire_shape() {
        let event = SessionEvent::TopicUpdate {
            topic: "Quantum error correction".into(),
            emphasis_level: 0.8,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "topic_update");
        assert_eq!(value["topic"], "Quantum error correction");
        assert!((value["emphasis_level"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn absent_speaker_is_omitted() {
        let event = SessionEvent::TranscriptInterim {
            text: "hello".into(),
            speaker: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "transcript_interim");
        assert!(value.get("speaker").is_none());
    }
}
