//! Token and cost estimation for billable embedding calls.
//!
//! Pricing lives here and nowhere else; the matcher only sees a [`CostModel`].

use serde::{Deserialize, Serialize};

/// USD per 1000 tokens for `text-embedding-3-large`.
pub const DEFAULT_COST_PER_1K_TOKENS: f64 = 0.00013;

/// Average characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Deterministic token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Estimated cost of a single embedding call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallCost {
    pub tokens: u64,
    pub cost: f64,
}

/// Pricing for embedding calls: a per-1000-token rate plus a token estimator.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    per_1k_tokens: f64,
    estimator: fn(&str) -> u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(DEFAULT_COST_PER_1K_TOKENS)
    }
}

impl CostModel {
    pub fn new(per_1k_tokens: f64) -> Self {
        Self {
            per_1k_tokens,
            estimator: estimate_tokens,
        }
    }

    /// Replace the token estimator (e.g. with a real tokenizer).
    pub fn with_estimator(mut self, estimator: fn(&str) -> u64) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn per_1k_tokens(&self) -> f64 {
        self.per_1k_tokens
    }

    pub fn estimate(&self, text: &str) -> CallCost {
        let tokens = (self.estimator)(text);
        CallCost {
            tokens,
            cost: tokens as f64 / 1000.0 * self.per_1k_tokens,
        }
    }
}

/// Running totals of embedding calls made during one match invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub calls: usize,
    pub tokens: u64,
    pub cost: f64,
}

impl EmbeddingUsage {
    pub fn record(&mut self, call: CallCost) {
        self.calls += 1;
        self.tokens += call.tokens;
        self.cost += call.cost;
    }
}
