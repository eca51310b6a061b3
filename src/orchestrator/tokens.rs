use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated usage for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl AgentUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Token and cost totals per agent across a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTracker {
    per_agent: BTreeMap<String, AgentUsage>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_for_agent(&mut self, agent: &str, input_tokens: u64, output_tokens: u64, cost: f64) {
        let usage = self.per_agent.entry(agent.to_string()).or_default();
        usage.input_tokens += input_tokens;
        usage.output_tokens += output_tokens;
        usage.cost_usd += cost;
    }

    pub fn agent(&self, agent: &str) -> Option<AgentUsage> {
        self.per_agent.get(agent).copied()
    }

    pub fn per_agent(&self) -> &BTreeMap<String, AgentUsage> {
        &self.per_agent
    }

    pub fn total(&self) -> AgentUsage {
        self.per_agent
            .values()
            .fold(AgentUsage::default(), |mut acc, u| {
                acc.input_tokens += u.input_tokens;
                acc.output_tokens += u.output_tokens;
                acc.cost_usd += u.cost_usd;
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_per_agent() {
        let mut tracker = TokenTracker::new();
        tracker.add_for_agent("Sparky", 100, 50, 0.01);
        tracker.add_for_agent("Sparky", 10, 5, 0.001);
        tracker.add_for_agent("Checkers", 1, 2, 0.0);

        let sparky = tracker.agent("Sparky").unwrap();
        assert_eq!(sparky.input_tokens, 110);
        assert_eq!(sparky.total_tokens(), 165);
        assert!((sparky.cost_usd - 0.011).abs() < 1e-9);

        let total = tracker.total();
        assert_eq!(total.input_tokens, 111);
        assert_eq!(total.output_tokens, 57);
        assert!(tracker.agent("Nobody").is_none());
    }

    #[test]
    fn test_empty_total() {
        assert_eq!(TokenTracker::new().total(), AgentUsage::default());
    }
}
