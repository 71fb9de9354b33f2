//! Structured outputs of the analysis adapter.

use crate::lecture::{BadgeKind, Citation};

/// Classification of an extracted key term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Concept,
    Person,
    Event,
}

impl TermKind {
    /// The card badge a term of this kind earns.
    pub fn badge(self) -> BadgeKind {
        match self {
            TermKind::Concept => BadgeKind::Concept,
            TermKind::Person => BadgeKind::Person,
            TermKind::Event => BadgeKind::Event,
        }
    }
}

/// A key term extracted from the transcript, not yet defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermHit {
    pub term: String,
    pub kind: TermKind,
}

/// The result of one analysis invocation over a batch of utterances.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub terms: Vec<TermHit>,
    pub topic: Option<String>,
    /// How central the current topic is, in `[0, 1]`.
    pub emphasis: f32,
    pub takeaway: Option<String>,
    pub summary: Option<String>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            topic: None,
            emphasis: 0.5,
            takeaway: None,
            summary: None,
        }
    }
}

/// A card-shaped adapter result, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDraft {
    pub term: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub badge: BadgeKind,
}
