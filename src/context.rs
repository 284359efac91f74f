//! Context Estimator: watches token statistics and tool-call count for the
//! current worker attempt, and requests a cooperative restart once either
//! crosses its configured threshold.

use crate::stream::TokenStats;

#[derive(Debug, Clone, Copy)]
pub struct ContextEstimator {
    threshold_pct: f64,
    tool_call_threshold: u64,
    context_tokens: u64,
    context_window: u64,
    tool_calls: u64,
    fired: bool,
}

impl ContextEstimator {
    pub fn new(threshold_pct: f64, tool_call_threshold: u64) -> Self {
        Self {
            threshold_pct,
            tool_call_threshold,
            context_tokens: 0,
            context_window: 200_000,
            tool_calls: 0,
            fired: false,
        }
    }

    /// Reset counters at the start of a new attempt.
    pub fn reset(&mut self) {
        self.context_tokens = 0;
        self.context_window = 200_000;
        self.tool_calls = 0;
        self.fired = false;
    }

    pub fn record_stats(&mut self, stats: &TokenStats) {
        self.context_tokens = stats.input_tokens + stats.cache_read_tokens + stats.cache_creation_tokens;
        if stats.context_window > 0 {
            self.context_window = stats.context_window;
        }
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Returns true exactly once per attempt, the first time the threshold
    /// is crossed by either signal.
    pub fn should_restart(&mut self) -> bool {
        if self.fired {
            return false;
        }
        let ratio = if self.context_window > 0 {
            self.context_tokens as f64 / self.context_window as f64
        } else {
            0.0
        };
        let over_tokens = ratio >= self.threshold_pct;
        let over_tool_calls = self.tool_calls >= self.tool_call_threshold;
        if over_tokens || over_tool_calls {
            self.fired = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(input: u64, window: u64) -> TokenStats {
        TokenStats {
            input_tokens: input,
            context_window: window,
            ..Default::default()
        }
    }

    #[test]
    fn fires_once_over_token_threshold() {
        let mut est = ContextEstimator::new(0.8, 1000);
        est.record_stats(&stats(85_000, 100_000));
        assert!(est.should_restart());
        assert!(!est.should_restart());
    }

    #[test]
    fn fires_over_tool_call_threshold() {
        let mut est = ContextEstimator::new(0.9, 3);
        for _ in 0..3 {
            est.record_tool_call();
        }
        assert!(est.should_restart());
    }

    #[test]
    fn does_not_fire_below_thresholds() {
        let mut est = ContextEstimator::new(0.8, 100);
        est.record_stats(&stats(10_000, 100_000));
        est.record_tool_call();
        assert!(!est.should_restart());
    }

    #[test]
    fn reset_clears_fired_and_counters() {
        let mut est = ContextEstimator::new(0.5, 1);
        est.record_tool_call();
        assert!(est.should_restart());
        est.reset();
        assert!(!est.should_restart());
    }
}
