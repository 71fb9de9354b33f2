//! Lecture, card, and takeaway records.
//!
//! A lecture owns zero-or-more cards and takeaways; ownership is modeled
//! unidirectionally (children carry a `lecture_id` back-reference) and the
//! store joins at query time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a lecture.
///
/// Within one session the status only moves forward:
/// idle → active → {paused ↔ active}* → completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LectureStatus {
    Idle,
    Active,
    Paused,
    Completed,
}

impl LectureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LectureStatus::Idle => "idle",
            LectureStatus::Active => "active",
            LectureStatus::Paused => "paused",
            LectureStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(LectureStatus::Idle),
            "active" => Some(LectureStatus::Active),
            "paused" => Some(LectureStatus::Paused),
            "completed" => Some(LectureStatus::Completed),
            _ => None,
        }
    }
}

/// Which path produced a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    AutoDefine,
    DeepResearch,
    Concept,
}

impl CardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CardKind::AutoDefine => "auto_define",
            CardKind::DeepResearch => "deep_research",
            CardKind::Concept => "concept",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_define" => Some(CardKind::AutoDefine),
            "deep_research" => Some(CardKind::DeepResearch),
            "concept" => Some(CardKind::Concept),
            _ => None,
        }
    }
}

/// Visual badge attached to a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    Concept,
    Person,
    Event,
    Research,
}

impl BadgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BadgeKind::Concept => "concept",
            BadgeKind::Person => "person",
            BadgeKind::Event => "event",
            BadgeKind::Research => "research",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concept" => Some(BadgeKind::Concept),
            "person" => Some(BadgeKind::Person),
            "event" => Some(BadgeKind::Event),
            "research" => Some(BadgeKind::Research),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A lecture row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lecture {
    pub id: String,
    pub title: String,
    pub status: LectureStatus,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cited source on a card. `domain` is the host of `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub domain: String,
}

/// A definition or research card produced during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub lecture_id: String,
    pub kind: CardKind,
    pub term: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub badge: BadgeKind,
    pub lecture_timestamp_seconds: u64,
    pub created_at: DateTime<Utc>,
}

/// A key point the speaker made, worth remembering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Takeaway {
    pub id: String,
    pub lecture_id: String,
    pub text: String,
    pub lecture_timestamp_seconds: u64,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A lecture joined with its card count, as returned by list queries.
#[derive(Debug, Clone, Serialize)]
pub struct LectureOverview {
    #[serde(flatten)]
    pub lecture: Lecture,
    pub card_count: u64,
}

/// Full lecture detail with owned artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct LectureDetail {
    #[serde(flatten)]
    pub lecture: Lecture,
    pub card_count: u64,
    pub cards: Vec<Card>,
    pub takeaways: Vec<Takeaway>,
}
