//! CostTracker: per-attempt accumulator for LLM token and cost-credit
//! consumption, with a hard check on every report.

use std::collections::HashMap;
use std::sync::Mutex;

use govrail_types::{AttemptId, Budget, GovrailError, GovrailResult};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct CostAccumulator {
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub api_calls_made: u64,
    pub cost_credits_used: u64,
}

impl CostAccumulator {
    pub fn llm_tokens_used(&self) -> u64 {
        self.llm_prompt_tokens + self.llm_completion_tokens
    }
}

struct Entry {
    accumulator: CostAccumulator,
    max_llm_tokens: Option<u64>,
    max_cost_credits: Option<u64>,
}

#[derive(Default)]
pub struct CostTracker {
    accumulators: Mutex<HashMap<AttemptId, Entry>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must not re-initialize an existing accumulator: a second call for
    /// the same attempt is a no-op.
    pub fn init_accumulator(&self, attempt_id: AttemptId, budget: &Budget) {
        let mut accumulators = self.accumulators.lock().expect("cost tracker poisoned");
        accumulators.entry(attempt_id).or_insert_with(|| Entry {
            accumulator: CostAccumulator::default(),
            max_llm_tokens: budget.max_llm_tokens,
            max_cost_credits: budget.max_cost_credits,
        });
    }

    pub fn track_llm_tokens(
        &self,
        attempt_id: &AttemptId,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> GovrailResult<()> {
        let mut accumulators = self.accumulators.lock().expect("cost tracker poisoned");
        let entry = accumulators
            .get_mut(attempt_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("no cost accumulator for attempt {attempt_id}"),
            })?;
        entry.accumulator.llm_prompt_tokens += prompt_tokens;
        entry.accumulator.llm_completion_tokens += completion_tokens;
        if let Some(max) = entry.max_llm_tokens {
            if entry.accumulator.llm_tokens_used() > max {
                warn!(%attempt_id, max, "llm token budget exceeded");
                return Err(GovrailError::BudgetCostExceeded);
            }
        }
        Ok(())
    }

    pub fn track_api_call(&self, attempt_id: &AttemptId, cost_credits: u64) -> GovrailResult<()> {
        let mut accumulators = self.accumulators.lock().expect("cost tracker poisoned");
        let entry = accumulators
            .get_mut(attempt_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("no cost accumulator for attempt {attempt_id}"),
            })?;
        entry.accumulator.api_calls_made += 1;
        entry.accumulator.cost_credits_used += cost_credits;
        if let Some(max) = entry.max_cost_credits {
            if entry.accumulator.cost_credits_used > max {
                warn!(%attempt_id, max, "cost credit budget exceeded");
                return Err(GovrailError::BudgetCostExceeded);
            }
        }
        Ok(())
    }

    /// Non-blocking check: has this attempt already crossed its budget?
    pub fn is_over_budget(&self, attempt_id: &AttemptId) -> bool {
        let accumulators = self.accumulators.lock().expect("cost tracker poisoned");
        match accumulators.get(attempt_id) {
            Some(entry) => {
                entry
                    .max_llm_tokens
                    .map(|max| entry.accumulator.llm_tokens_used() > max)
                    .unwrap_or(false)
                    || entry
                        .max_cost_credits
                        .map(|max| entry.accumulator.cost_credits_used > max)
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    pub fn get_accumulator(&self, attempt_id: &AttemptId) -> Option<CostAccumulator> {
        self.accumulators
            .lock()
            .expect("cost tracker poisoned")
            .get(attempt_id)
            .map(|entry| entry.accumulator.clone())
    }

    /// Detaches and returns the accumulator at attempt end.
    pub fn finalize_accumulator(&self, attempt_id: &AttemptId) -> Option<CostAccumulator> {
        self.accumulators
            .lock()
            .expect("cost tracker poisoned")
            .remove(attempt_id)
            .map(|entry| entry.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let tracker = CostTracker::new();
        let attempt_id = AttemptId::new();
        let budget = Budget {
            max_llm_tokens: Some(100),
            ..Default::default()
        };
        tracker.init_accumulator(attempt_id.clone(), &budget);
        tracker.track_llm_tokens(&attempt_id, 50, 0).unwrap();
        tracker.init_accumulator(attempt_id.clone(), &Budget::default());
        assert_eq!(tracker.get_accumulator(&attempt_id).unwrap().llm_tokens_used(), 50);
    }

    #[test]
    fn crossing_token_budget_fails_immediately() {
        let tracker = CostTracker::new();
        let attempt_id = AttemptId::new();
        let budget = Budget {
            max_llm_tokens: Some(100),
            ..Default::default()
        };
        tracker.init_accumulator(attempt_id.clone(), &budget);
        tracker.track_llm_tokens(&attempt_id, 60, 0).unwrap();
        let err = tracker.track_llm_tokens(&attempt_id, 60, 0).unwrap_err();
        assert_eq!(err.code(), "BUDGET_COST_EXCEEDED");
    }

    #[test]
    fn finalize_detaches_accumulator() {
        let tracker = CostTracker::new();
        let attempt_id = AttemptId::new();
        tracker.init_accumulator(attempt_id.clone(), &Budget::default());
        tracker.track_api_call(&attempt_id, 5).unwrap();
        let finalized = tracker.finalize_accumulator(&attempt_id).unwrap();
        assert_eq!(finalized.cost_credits_used, 5);
        assert!(tracker.get_accumulator(&attempt_id).is_none());
    }
}
