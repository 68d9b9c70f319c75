//! Sliding-window loop detection over LLM-produced plans.

use std::collections::VecDeque;

use serde_json::Value as Json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub window_size: usize,
    pub max_repeats: usize,
    pub max_consecutive_failures: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            max_repeats: 4,
            max_consecutive_failures: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    action: String,
    args_hash: String,
    success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopWarning {
    pub kind: String,
    pub suggestion: String,
}

#[derive(Debug)]
pub struct LoopDetector {
    config: LoopConfig,
    window: VecDeque<Fingerprint>,
    detected: bool,
}

/// Stable hash over canonicalized args: serde_json objects already order
/// keys, so serializing is canonical enough.
pub fn args_hash(args: &Json) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

impl LoopDetector {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            detected: false,
        }
    }

    pub fn loop_detected(&self) -> bool {
        self.detected
    }

    /// Record one produced plan and run the detection rules in order.
    /// A single call reports at most one rule.
    pub fn observe(&mut self, action: &str, args_hash: String) -> Option<LoopWarning> {
        self.window.push_back(Fingerprint {
            action: action.to_string(),
            args_hash,
            success: true,
        });
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        let warning = self
            .exact_repeat()
            .or_else(|| self.action_cycle())
            .or_else(|| self.failure_streak())
            .or_else(|| self.oscillation());
        if warning.is_some() {
            self.detected = true;
        }
        warning
    }

    /// Update the success flag of the most recent fingerprint once the
    /// action has actually been applied.
    pub fn mark_last_result(&mut self, success: bool) {
        if let Some(last) = self.window.back_mut() {
            last.success = success;
        }
    }

    fn exact_repeat(&self) -> Option<LoopWarning> {
        let n = self.config.max_repeats;
        if self.window.len() < n {
            return None;
        }
        let tail: Vec<&Fingerprint> = self.window.iter().rev().take(n).collect();
        let first = tail[0];
        if tail
            .iter()
            .all(|fp| fp.action == first.action && fp.args_hash == first.args_hash)
        {
            return Some(LoopWarning {
                kind: "exact_repeat".into(),
                suggestion: format!(
                    "the same {} with identical args ran {n} times in a row; change the \
                     arguments or pick a different action",
                    first.action
                ),
            });
        }
        None
    }

    /// A k-action block (k in 2..=4) occurring four times back to back:
    /// the last k actions equal the preceding k, repeated over 4k entries.
    fn action_cycle(&self) -> Option<LoopWarning> {
        const OCCURRENCES: usize = 4;
        let actions: Vec<&str> = self.window.iter().map(|fp| fp.action.as_str()).collect();
        for k in 2..=4usize {
            let needed = k * OCCURRENCES;
            if actions.len() < needed {
                continue;
            }
            let tail = &actions[actions.len() - needed..];
            let block = &tail[..k];
            if tail.chunks(k).all(|chunk| chunk == block) {
                return Some(LoopWarning {
                    kind: "action_cycle".into(),
                    suggestion: format!(
                        "the action sequence [{}] is cycling; break the pattern or stop",
                        block.join(", ")
                    ),
                });
            }
        }
        None
    }

    /// The entry just pushed by `observe` has not run yet, so the streak
    /// is judged over the entries preceding it.
    fn failure_streak(&self) -> Option<LoopWarning> {
        let n = self.config.max_consecutive_failures;
        if self.window.len() < n + 1 {
            return None;
        }
        if self.window.iter().rev().skip(1).take(n).all(|fp| !fp.success) {
            return Some(LoopWarning {
                kind: "failure_loop".into(),
                suggestion: format!(
                    "{n} consecutive actions failed; reconsider the approach instead of retrying"
                ),
            });
        }
        None
    }

    /// Strict A-B-A-B-A-B over the last six actions.
    fn oscillation(&self) -> Option<LoopWarning> {
        if self.window.len() < 6 {
            return None;
        }
        let tail: Vec<&str> = self
            .window
            .iter()
            .rev()
            .take(6)
            .map(|fp| fp.action.as_str())
            .collect();
        let (a, b) = (tail[0], tail[1]);
        if a != b && tail.iter().step_by(2).all(|x| *x == a) && tail.iter().skip(1).step_by(2).all(|x| *x == b)
        {
            return Some(LoopWarning {
                kind: "oscillation".into(),
                suggestion: format!(
                    "actions are alternating {b} / {a} without progress; try a third approach"
                ),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopConfig::default())
    }

    #[test]
    fn test_args_hash_stable_across_key_order() {
        let a = json!({"path": "a.txt", "maxBytes": 10});
        let b = json!({"maxBytes": 10, "path": "a.txt"});
        assert_eq!(args_hash(&a), args_hash(&b));
        assert_ne!(args_hash(&a), args_hash(&json!({"path": "b.txt"})));
    }

    #[test]
    fn test_exact_repeat_on_fourth_identical_plan() {
        let mut det = detector();
        let hash = args_hash(&json!({"path": "a"}));
        for round in 1..=4 {
            let warning = det.observe("READ_FILE", hash.clone());
            if round < 4 {
                assert!(warning.is_none(), "warned early at {round}");
            } else {
                assert_eq!(warning.unwrap().kind, "exact_repeat");
            }
        }
        assert!(det.loop_detected());
    }

    #[test]
    fn test_same_action_different_args_not_exact_repeat() {
        let mut det = detector();
        for index in 0..6 {
            let warning = det.observe("READ_FILE", args_hash(&json!({"path": index})));
            assert!(warning.is_none());
        }
    }

    #[test]
    fn test_oscillation_after_six_alternations() {
        let mut det = detector();
        for round in 0..6 {
            let action = if round % 2 == 0 { "READ_FILE" } else { "WRITE_FILE" };
            let warning = det.observe(action, args_hash(&json!({"round": round})));
            if round < 5 {
                assert!(warning.is_none(), "warned early at {round}");
            } else {
                assert_eq!(warning.unwrap().kind, "oscillation");
            }
        }
    }

    #[test]
    fn test_failure_streak_fires_after_five_failures() {
        let mut det = detector();
        for round in 0..5 {
            let warning = det.observe("RUN_CMD", args_hash(&json!({"round": round})));
            assert!(warning.is_none(), "warned early at {round}");
            det.mark_last_result(false);
        }
        // The streak is judged on the next produced plan.
        let warning = det.observe("SEARCH", args_hash(&json!({"q": "x"})));
        assert_eq!(warning.unwrap().kind, "failure_loop");
    }

    #[test]
    fn test_success_interrupts_failure_streak() {
        let mut det = detector();
        for round in 0..4 {
            det.observe("RUN_CMD", args_hash(&json!({"round": round})));
            det.mark_last_result(false);
        }
        det.observe("RUN_CMD", args_hash(&json!({"round": 99})));
        det.mark_last_result(true);
        let warning = det.observe("SEARCH", args_hash(&json!({"q": "x"})));
        assert!(warning.is_none());
    }

    #[test]
    fn test_action_cycle_needs_four_occurrences() {
        let mut det = detector();
        let mut last = None;
        for round in 0..8 {
            let action = match round % 2 {
                0 => "READ_FILE",
                _ => "SEARCH",
            };
            // Vary args so exact repeat stays out of the picture.
            last = det.observe(action, args_hash(&json!({"round": round})));
            if round == 5 {
                // Six entries of strict alternation report oscillation
                // before the cycle rule has enough occurrences.
                assert_eq!(last.as_ref().unwrap().kind, "oscillation");
            }
        }
        // At eight entries both rules match; the cycle rule is checked
        // first.
        assert_eq!(last.unwrap().kind, "action_cycle");
    }

    #[test]
    fn test_window_trimmed() {
        let mut det = LoopDetector::new(LoopConfig {
            window_size: 4,
            ..LoopConfig::default()
        });
        for round in 0..10 {
            det.observe("SEARCH", args_hash(&json!({"round": round})));
        }
        assert!(det.window.len() <= 4);
    }
}
