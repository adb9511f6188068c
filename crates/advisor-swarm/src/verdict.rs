//! Parsing of model output inside the agent loop: tool directives,
//! explicit verdict/confidence markers, and the keyword fallback applied
//! when a persona answers in prose without markers.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One persona's categorical answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Yes,
    No,
    Maybe,
    NeedsData,
}

impl Verdict {
    fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "maybe" => Some(Self::Maybe),
            "needsdata" => Some(Self::NeedsData),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Maybe => write!(f, "maybe"),
            Self::NeedsData => write!(f, "needs-data"),
        }
    }
}

/// A well-formed tool request parsed out of model output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolDirective {
    pub tool: String,
    pub args: serde_json::Value,
}

/// A final answer extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub verdict: Verdict,
    pub confidence: u8,
    pub reasoning: String,
}

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**verdict\**\s*[:=]\s*\**(yes|no|maybe|needs[-_ ]?data)\b").unwrap()
});
static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*\**confidence\**\s*[:=]\s*(\d+)").unwrap());

/// Parse a tool directive: the whole reply (or its fenced JSON block)
/// must be exactly one object of shape `{"tool": ..., "args": ...}` with
/// no extra keys. Anything looser is a final answer, not a tool call.
pub fn parse_directive(text: &str) -> Option<ToolDirective> {
    let candidate = extract_json_block(text).unwrap_or_else(|| text.trim());
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;
    if object.len() != 2 || !object.contains_key("tool") || !object.contains_key("args") {
        return None;
    }
    Some(ToolDirective {
        tool: object.get("tool")?.as_str()?.to_string(),
        args: object.get("args")?.clone(),
    })
}

/// Parse a final answer. Explicit `verdict:`/`confidence:` marker lines
/// win; without them a keyword heuristic over the lowercase text decides,
/// defaulting to maybe/50.
pub fn parse_final(text: &str) -> FinalAnswer {
    let verdict = VERDICT_RE
        .captures(text)
        .and_then(|c| Verdict::from_token(&c[1]));
    let confidence = CONFIDENCE_RE
        .captures(text)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(|n| n.min(100) as u8);

    let reasoning = strip_marker_lines(text);
    match (verdict, confidence) {
        (Some(verdict), Some(confidence)) => FinalAnswer {
            verdict,
            confidence,
            reasoning,
        },
        (Some(verdict), None) => FinalAnswer {
            verdict,
            confidence: 50,
            reasoning,
        },
        (None, confidence) => {
            let (verdict, heuristic_confidence) = keyword_heuristic(text);
            FinalAnswer {
                verdict,
                confidence: confidence.unwrap_or(heuristic_confidence),
                reasoning,
            }
        }
    }
}

/// Keyword fallback for marker-free prose.
fn keyword_heuristic(text: &str) -> (Verdict, u8) {
    let lower = text.to_lowercase();
    if lower.contains("recommend") && lower.contains("proceed") {
        (Verdict::Yes, 70)
    } else if lower.contains("do not") || lower.contains("avoid") {
        (Verdict::No, 60)
    } else {
        (Verdict::Maybe, 50)
    }
}

fn strip_marker_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !VERDICT_RE.is_match(line) && !CONFIDENCE_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let body = &text[start + 7..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}
