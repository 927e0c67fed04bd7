use serde::Serialize;

use crate::dispatch::TokenUsage;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 0.05,
            output_per_million: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl Pricing {
    /// Prices a single token count at both rates, for callers that only know
    /// the total.
    pub fn estimate(&self, tokens_used: u64) -> CostEstimate {
        self.estimate_split(tokens_used, tokens_used)
    }

    pub fn estimate_split(&self, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let input_cost = input_tokens as f64 * self.input_per_million / TOKENS_PER_UNIT;
        let output_cost = output_tokens as f64 * self.output_per_million / TOKENS_PER_UNIT;
        CostEstimate {
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    pub fn estimate_usage(&self, usage: TokenUsage) -> CostEstimate {
        self.estimate_split(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-12
    }

    #[test]
    fn single_count_uses_both_rates() {
        let cost = Pricing::default().estimate(1_000_000);
        assert!(close(cost.input_cost, 0.05));
        assert!(close(cost.output_cost, 0.20));
        assert!(close(cost.total_cost, 0.25));
        assert_eq!(cost.output_tokens, 1_000_000);
    }

    #[test]
    fn split_counts_are_priced_separately() {
        let pricing = Pricing {
            input_per_million: 2.0,
            output_per_million: 8.0,
        };
        let cost = pricing.estimate_usage(TokenUsage::new(500_000, 250_000));
        assert!(close(cost.input_cost, 1.0));
        assert!(close(cost.output_cost, 2.0));
        assert!(close(cost.total_cost, 3.0));
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(Pricing::default().estimate(0).total_cost, 0.0);
    }
}
