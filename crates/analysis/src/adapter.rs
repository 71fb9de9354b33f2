//! The analysis adapter: four prompted operations over the chat client.
//!
//! All four are idempotent with respect to their inputs. Model replies are
//! parsed against a strict schema — a violation fails the whole call so the
//! scheduler's retry logic can engage; there is no partial parse.

use async_trait::async_trait;

use lectern_domain::analysis::{Analysis, CardDraft, TermHit, TermKind};
use lectern_domain::config::LlmConfig;
use lectern_domain::error::{Error, Result};
use lectern_domain::lecture::{BadgeKind, Citation};
use serde::Deserialize;

use crate::client::ChatClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Truncation windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Analysis looks at the most recent slice of the transcript only.
const ANALYZE_TAIL_CHARS: usize = 1_500;
/// The rolling summary reads further back.
const SUMMARY_TAIL_CHARS: usize = 4_000;
/// Definitions get a short disambiguation tail.
const DEFINE_CONTEXT_CHARS: usize = 200;
/// Research prompts get a slightly longer context head.
const RESEARCH_CONTEXT_CHARS: usize = 400;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The seam between the pipeline scheduler and the upstream LLM.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// One-shot extraction of terms, topic, emphasis, takeaway, and summary
    /// from the most recent transcript slice. Any upstream or parse error
    /// fails the call; the scheduler retries.
    async fn analyze(&self, transcript: &str) -> Result<Analysis>;

    /// Define every term concurrently; failed definitions are dropped.
    async fn define_batch(&self, terms: &[TermHit], context_tail: &str) -> Vec<CardDraft>;

    /// A multi-paragraph explanation with optional citations. `Ok(None)`
    /// means the model produced nothing usable.
    async fn deep_research(&self, topic: &str, context: &str) -> Result<Option<CardDraft>>;

    /// A short rolling summary of the transcript so far.
    async fn summarize(&self, transcript: &str) -> Result<Option<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM-backed implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmAnalyzer {
    chat: ChatClient,
}

impl LlmAnalyzer {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::from_config(cfg)?,
        })
    }

    async fn define_one(&self, hit: &TermHit, context_tail: &str) -> Option<CardDraft> {
        if hit.term.trim().is_empty() {
            return None;
        }
        let prompt = definition_prompt(&hit.term, tail_chars(context_tail, DEFINE_CONTEXT_CHARS));
        match self.chat.complete(&prompt, 0.7, 256).await {
            Ok(content) if !content.is_empty() => Some(CardDraft {
                term: hit.term.clone(),
                content,
                citations: Vec::new(),
                badge: hit.kind.badge(),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(term = %hit.term, error = %e, "definition failed; dropping term");
                None
            }
        }
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<Analysis> {
        if transcript.trim().is_empty() {
            return Ok(Analysis::default());
        }
        let prompt = analyze_prompt(tail_chars(transcript, ANALYZE_TAIL_CHARS));
        let raw = self.chat.complete(&prompt, 0.7, 512).await?;
        parse_analysis(&raw)
    }

    async fn define_batch(&self, terms: &[TermHit], context_tail: &str) -> Vec<CardDraft> {
        let calls = terms.iter().map(|hit| self.define_one(hit, context_tail));
        futures_util::future::join_all(calls)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn deep_research(&self, topic: &str, context: &str) -> Result<Option<CardDraft>> {
        if topic.trim().is_empty() {
            return Ok(None);
        }
        let prompt = research_prompt(topic, head_chars(context, RESEARCH_CONTEXT_CHARS));
        let raw = self.chat.complete(&prompt, 0.7, 1_024).await?;
        parse_research(topic, &raw)
    }

    async fn summarize(&self, transcript: &str) -> Result<Option<String>> {
        if transcript.trim().is_empty() {
            return Ok(None);
        }
        let prompt = summary_prompt(tail_chars(transcript, SUMMARY_TAIL_CHARS));
        let summary = self.chat.complete(&prompt, 0.7, 256).await?;
        Ok(non_empty(Some(summary)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn analyze_prompt(transcript: &str) -> String {
    format!(
        "You are a lecture assistant analyzing the live transcript of a lecture.\n\
         The following is the most recent part of the transcript.\n\n\
         Your task:\n\
         1. Identify the current topic being discussed at the very end of the transcript.\n\
         2. Extract 2-3 current key technical terms or concepts from the recent context that need defining.\n\
         3. Estimate the emphasis level of the current topic (0.0 = passing mention, 1.0 = central focus).\n\
         4. Extract a takeaway if the speaker just finished a key point.\n\
         5. Provide a concise summary of this specific segment.\n\n\
         Return ONLY this JSON:\n\
         {{\"terms\": [{{\"term\": \"...\", \"type\": \"concept\"}}], \"topic\": \"...\", \
         \"emphasis_level\": 0.7, \"takeaway\": \"...\" or null, \"summary\": \"...\"}}\n\
         Valid term types are \"concept\", \"person\", and \"event\".\n\n\
         Transcript:\n{transcript}"
    )
}

fn definition_prompt(term: &str, context: &str) -> String {
    format!(
        "You are a lecture assistant. Define the term below in 1-3 clear sentences.\n\
         Use the lecture context only to disambiguate meaning. Avoid citations.\n\n\
         Term: {term}\n\
         Context: {context}"
    )
}

fn research_prompt(topic: &str, context: &str) -> String {
    format!(
        "You are a research assistant. Write a thorough, multi-paragraph explanation\n\
         of the topic below for a student. Use the lecture context only to disambiguate.\n\n\
         Return ONLY this JSON:\n\
         {{\"content\": \"...\", \"citations\": [{{\"title\": \"...\", \"url\": \"...\"}}]}}\n\
         The citations list may be empty.\n\n\
         Topic: {topic}\n\
         Context: {context}"
    )
}

fn summary_prompt(transcript: &str) -> String {
    format!(
        "You are a lecture assistant. Produce a concise, 3-5 sentence summary of the\n\
         following lecture transcript so far. Focus on the main topics covered.\n\
         Transcript:\n{transcript}"
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    #[serde(default)]
    terms: Vec<TermWire>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    emphasis_level: Option<f64>,
    #[serde(default)]
    takeaway: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TermWire {
    term: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

fn parse_analysis(raw: &str) -> Result<Analysis> {
    let wire: AnalysisWire = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::Llm(format!("analysis reply was not valid JSON: {e}")))?;

    let emphasis = match wire.emphasis_level {
        None => 0.5,
        Some(v) if (0.0..=1.0).contains(&v) => v as f32,
        Some(v) => return Err(Error::Llm(format!("emphasis_level {v} out of range"))),
    };

    let mut terms = Vec::with_capacity(wire.terms.len());
    for t in wire.terms {
        if t.term.trim().is_empty() {
            return Err(Error::Llm("analysis produced an empty term".into()));
        }
        let kind = match t.kind.as_deref() {
            None | Some("concept") => TermKind::Concept,
            Some("person") => TermKind::Person,
            Some("event") => TermKind::Event,
            Some(other) => return Err(Error::Llm(format!("unknown term type: {other}"))),
        };
        terms.push(TermHit { term: t.term, kind });
    }

    Ok(Analysis {
        terms,
        topic: non_empty(wire.topic),
        emphasis,
        takeaway: non_empty(wire.takeaway),
        summary: non_empty(wire.summary),
    })
}

#[derive(Debug, Deserialize)]
struct ResearchWire {
    #[serde(default)]
    content: String,
    #[serde(default)]
    citations: Vec<CitationWire>,
}

#[derive(Debug, Deserialize)]
struct CitationWire {
    #[serde(default)]
    title: String,
    url: String,
}

fn parse_research(topic: &str, raw: &str) -> Result<Option<CardDraft>> {
    let wire: ResearchWire = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::Llm(format!("research reply was not valid JSON: {e}")))?;

    if wire.content.trim().is_empty() {
        return Ok(None);
    }

    let citations = wire
        .citations
        .into_iter()
        .filter_map(normalize_citation)
        .collect();

    Ok(Some(CardDraft {
        term: topic.to_owned(),
        content: wire.content,
        citations,
        badge: BadgeKind::Concept,
    }))
}

/// Normalize a cited source, deriving the domain from the URL host.
/// Citations with unparseable URLs are dropped.
fn normalize_citation(c: CitationWire) -> Option<Citation> {
    let parsed = url::Url::parse(&c.url).ok()?;
    let domain = parsed.host_str()?.to_owned();
    let title = if c.title.trim().is_empty() {
        c.url.clone()
    } else {
        c.title
    };
    Some(Citation {
        title,
        url: c.url,
        domain,
    })
}

/// Strip a surrounding markdown code fence (``` or ```json) from a reply.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// The last `n` characters of `s`, on a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((start, _)) => &s[start..],
        None => s,
    }
}

/// The first `n` characters of `s`, on a char boundary.
fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn parses_a_full_analysis_reply() {
        let raw = r#"```json
        {"terms": [{"term": "Transformer", "type": "concept"},
                   {"term": "Vaswani", "type": "person"}],
         "topic": "Attention mechanisms",
         "emphasis_level": 0.8,
         "takeaway": "Attention replaces recurrence.",
         "summary": "The lecture covers attention."}
        ```"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.terms.len(), 2);
        assert_eq!(analysis.terms[0].term, "Transformer");
        assert_eq!(analysis.terms[0].kind, TermKind::Concept);
        assert_eq!(analysis.terms[1].kind, TermKind::Person);
        assert_eq!(analysis.topic.as_deref(), Some("Attention mechanisms"));
        assert!((analysis.emphasis - 0.8).abs() < 1e-6);
        assert_eq!(
            analysis.takeaway.as_deref(),
            Some("Attention replaces recurrence.")
        );
        assert!(analysis.summary.is_some());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let analysis = parse_analysis(r#"{"terms": []}"#).unwrap();
        assert!(analysis.terms.is_empty());
        assert!(analysis.topic.is_none());
        assert!((analysis.emphasis - 0.5).abs() < 1e-6);
        assert!(analysis.takeaway.is_none());
        assert!(analysis.summary.is_none());
    }

    #[test]
    fn null_and_empty_strings_become_absent() {
        let raw = r#"{"terms": [], "topic": "", "takeaway": null, "summary": "  "}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert!(analysis.topic.is_none());
        assert!(analysis.takeaway.is_none());
        assert!(analysis.summary.is_none());
    }

    #[test]
    fn out_of_range_emphasis_fails_the_call() {
        assert!(parse_analysis(r#"{"terms": [], "emphasis_level": 1.4}"#).is_err());
        assert!(parse_analysis(r#"{"terms": [], "emphasis_level": -0.1}"#).is_err());
    }

    #[test]
    fn unknown_term_type_fails_the_call() {
        let raw = r#"{"terms": [{"term": "RSA", "type": "acronym"}]}"#;
        assert!(parse_analysis(raw).is_err());
    }

    #[test]
    fn empty_term_fails_the_call() {
        let raw = r#"{"terms": [{"term": "  ", "type": "concept"}]}"#;
        assert!(parse_analysis(raw).is_err());
    }

    #[test]
    fn non_json_reply_fails_the_call() {
        assert!(parse_analysis("The topic is attention.").is_err());
    }

    #[test]
    fn research_reply_normalizes_citations() {
        let raw = r#"{"content": "Shor's algorithm factors integers.",
                      "citations": [
                        {"title": "Original paper", "url": "https://arxiv.org/abs/quant-ph/9508027"},
                        {"title": "", "url": "https://quantum.example.org/shor"},
                        {"title": "broken", "url": "not a url"}
                      ]}"#;
        let draft = parse_research("Shor's algorithm", raw).unwrap().unwrap();
        assert_eq!(draft.term, "Shor's algorithm");
        assert_eq!(draft.badge, BadgeKind::Concept);
        assert_eq!(draft.citations.len(), 2);
        assert_eq!(draft.citations[0].domain, "arxiv.org");
        // An empty title falls back to the URL.
        assert_eq!(draft.citations[1].title, "https://quantum.example.org/shor");
        assert_eq!(draft.citations[1].domain, "quantum.example.org");
    }

    #[test]
    fn empty_research_content_is_absent() {
        let draft = parse_research("RSA", r#"{"content": "  ", "citations": []}"#).unwrap();
        assert!(draft.is_none());
    }

    #[test]
    fn tail_and_head_respect_char_boundaries() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("héllo", 10), "héllo");
        assert_eq!(tail_chars("héllo", 0), "");
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(head_chars("héllo", 10), "héllo");
    }
}
