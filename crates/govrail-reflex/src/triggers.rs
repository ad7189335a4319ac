//! Sliding-window triggers: error-rate and budget-violation-burst counters
//! that emit a `TriggerEvent` on breach and then cool down per target so a
//! single spike does not re-fire repeatedly.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use govrail_types::TriggerEvent;
use uuid::Uuid;

struct Window {
    span: ChronoDuration,
    events: VecDeque<(DateTime<Utc>, bool)>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl Window {
    fn new(span: ChronoDuration) -> Self {
        Self {
            span,
            events: VecDeque::new(),
            cooldown_until: None,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        while let Some((ts, _)) = self.events.front() {
            if *ts < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }
}

/// "Error rate >= threshold over the last window_secs seconds."
pub struct ErrorRateTrigger {
    trigger_id: String,
    threshold: f64,
    window_secs: i64,
    cooldown: ChronoDuration,
    min_samples: usize,
    windows: HashMap<String, Window>,
}

impl ErrorRateTrigger {
    pub fn new(trigger_id: impl Into<String>, threshold: f64, window_secs: i64, cooldown_ms: u64, min_samples: usize) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            threshold,
            window_secs,
            cooldown: ChronoDuration::milliseconds(cooldown_ms as i64),
            min_samples,
            windows: HashMap::new(),
        }
    }

    pub fn record(&mut self, target_job_id: &str, is_failure: bool) -> Option<TriggerEvent> {
        let now = Utc::now();
        let window = self
            .windows
            .entry(target_job_id.to_string())
            .or_insert_with(|| Window::new(ChronoDuration::seconds(self.window_secs)));
        window.prune(now);

        if window.in_cooldown(now) {
            window.events.push_back((now, is_failure));
            return None;
        }

        window.events.push_back((now, is_failure));
        let total = window.events.len();
        if total < self.min_samples {
            return None;
        }
        let failures = window.events.iter().filter(|(_, f)| *f).count();
        let rate = failures as f64 / total as f64;

        if rate >= self.threshold {
            window.cooldown_until = Some(now + self.cooldown);
            Some(TriggerEvent {
                trigger_id: format!("{}:{}", self.trigger_id, Uuid::new_v4()),
                target_job_id: target_job_id.to_string(),
                metric_value: rate,
                threshold: self.threshold,
                reason: format!("error rate {failures}/{total} over {}s", self.window_secs),
            })
        } else {
            None
        }
    }
}

/// "N or more budget violations per target in the last window_secs seconds."
pub struct BudgetViolationTrigger {
    trigger_id: String,
    threshold: u32,
    window_secs: i64,
    cooldown: ChronoDuration,
    windows: HashMap<String, Window>,
}

impl BudgetViolationTrigger {
    pub fn new(trigger_id: impl Into<String>, threshold: u32, window_secs: i64, cooldown_ms: u64) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            threshold,
            window_secs,
            cooldown: ChronoDuration::milliseconds(cooldown_ms as i64),
            windows: HashMap::new(),
        }
    }

    pub fn record_violation(&mut self, target_job_id: &str) -> Option<TriggerEvent> {
        let now = Utc::now();
        let window = self
            .windows
            .entry(target_job_id.to_string())
            .or_insert_with(|| Window::new(ChronoDuration::seconds(self.window_secs)));
        window.prune(now);

        if window.in_cooldown(now) {
            window.events.push_back((now, true));
            return None;
        }

        window.events.push_back((now, true));
        let count = window.events.len() as u32;

        if count >= self.threshold {
            window.cooldown_until = Some(now + self.cooldown);
            Some(TriggerEvent {
                trigger_id: format!("{}:{}", self.trigger_id, Uuid::new_v4()),
                target_job_id: target_job_id.to_string(),
                metric_value: count as f64,
                threshold: self.threshold as f64,
                reason: format!("{count} budget violations over {}s", self.window_secs),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S6 — error rate 5/10 over a 60s window at threshold 50% breaches.
    #[test]
    fn s6_error_rate_breach_at_five_of_ten() {
        let mut trigger = ErrorRateTrigger::new("error-rate", 0.5, 60, 60_000, 1);
        let mut emitted = None;
        for i in 0..10 {
            let is_failure = i % 2 == 0;
            if let Some(event) = trigger.record("job-1", is_failure) {
                emitted = Some(event);
            }
        }
        let event = emitted.expect("expected a breach by the tenth sample");
        assert_eq!(event.metric_value, 0.5);
    }

    #[test]
    fn cooldown_suppresses_refire_on_next_breach() {
        let mut trigger = ErrorRateTrigger::new("error-rate", 0.5, 60, 60_000, 1);
        for _ in 0..4 {
            trigger.record("job-1", true);
        }
        // Already over threshold, should have fired once by now.
        let refire = trigger.record("job-1", true);
        assert!(refire.is_none());
    }

    #[test]
    fn budget_violation_burst_breaches_at_threshold() {
        let mut trigger = BudgetViolationTrigger::new("budget-burst", 3, 60, 60_000);
        assert!(trigger.record_violation("job-2").is_none());
        assert!(trigger.record_violation("job-2").is_none());
        let event = trigger.record_violation("job-2").expect("third violation breaches");
        assert_eq!(event.metric_value, 3.0);
    }
}
