//! Static price table and pure cost estimation.
//!
//! Rates are USD per 1M tokens, matched by model-name prefix so dated
//! releases ("claude-sonnet-4-20250514") share their family's rate.
//! Unknown hosted models fall back to a deliberately conservative default
//! so estimates err high rather than silently undercounting.

use crate::types::TokenUsage;

/// Per-model pricing in USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelRate {
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
        }
    }

    /// Cost of a request with the given token counts.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1_000_000.0) * self.input_per_1m
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.output_per_1m
    }
}

/// Applied when no table entry matches.
pub const DEFAULT_RATE: ModelRate = ModelRate::new(5.0, 15.0);

// Longest prefixes first so "gpt-4o-mini" is not shadowed by "gpt-4o".
const PRICE_TABLE: &[(&str, ModelRate)] = &[
    ("claude-opus-4", ModelRate::new(15.0, 75.0)),
    ("claude-sonnet-4", ModelRate::new(3.0, 15.0)),
    ("claude-haiku-4", ModelRate::new(0.80, 4.0)),
    ("gpt-4o-mini", ModelRate::new(0.15, 0.60)),
    ("gpt-4o", ModelRate::new(2.50, 10.0)),
    ("o3-mini", ModelRate::new(1.10, 4.40)),
    ("gemini-2.5-pro", ModelRate::new(1.25, 10.0)),
    ("gemini-2.5-flash", ModelRate::new(0.30, 2.50)),
    ("gemini-2.0-flash", ModelRate::new(0.10, 0.40)),
];

/// Look up the rate for a model, falling back to [`DEFAULT_RATE`].
pub fn rate_for(model: &str) -> ModelRate {
    PRICE_TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE)
}

/// Pure cost estimate for a served request. Local adapters bypass this
/// entirely and report zero.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    rate_for(model).cost(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_rate() {
        let rate = rate_for("gpt-4o");
        assert_eq!(rate.input_per_1m, 2.50);
        assert_eq!(rate.output_per_1m, 10.0);
    }

    #[test]
    fn test_prefix_match_handles_dated_releases() {
        let dated = rate_for("claude-sonnet-4-20250514");
        let family = rate_for("claude-sonnet-4");
        assert_eq!(dated, family);
    }

    #[test]
    fn test_mini_not_shadowed_by_base() {
        assert_eq!(rate_for("gpt-4o-mini").input_per_1m, 0.15);
        assert_eq!(rate_for("gpt-4o-2024-11-20").input_per_1m, 2.50);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        assert_eq!(rate_for("some-new-model"), DEFAULT_RATE);
    }

    #[test]
    fn test_cost_math() {
        // 1M prompt + 1M completion tokens of gpt-4o: 2.50 + 10.00.
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        let cost = estimate_cost("gpt-4o", &usage);
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let usage = TokenUsage::new(0, 0);
        assert_eq!(estimate_cost("claude-opus-4", &usage), 0.0);
    }
}
