use std::sync::Arc;
use std::time::Instant;

use hearth_domain::{DeviceValue, RuleCategory, SafetyContext};
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::rule::{RuleOutcome, SafetyRule};

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// When true, a rule whose evaluation errors is skipped instead of
    /// refusing the value. Default is fail-closed.
    pub fail_open: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings { fail_open: false }
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Final verdict of a full engine pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvaluationResult {
    Accepted,
    Modified {
        original: DeviceValue,
        value: DeviceValue,
        /// Ids of the rules whose modifications produced the final value.
        modified_by: Vec<String>,
        reason: String,
    },
    Refused {
        rule_id: String,
        reason: String,
        detail: Option<String>,
    },
}

/// Engine pass result plus the ids of every rule that was actually invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyEvaluation {
    pub result: SafetyEvaluationResult,
    pub evaluated: Vec<String>,
}

impl SafetyEvaluation {
    pub fn is_refused(&self) -> bool {
        matches!(self.result, SafetyEvaluationResult::Refused { .. })
    }

    /// The value that survived the pass, if any.
    pub fn final_value(&self, proposed: &DeviceValue) -> Option<DeviceValue> {
        match &self.result {
            SafetyEvaluationResult::Accepted => Some(*proposed),
            SafetyEvaluationResult::Modified { value, .. } => Some(*value),
            SafetyEvaluationResult::Refused { .. } => None,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Ordered rule pipeline.
///
/// Rules run category-descending, then priority-ascending; rules with equal
/// category and priority keep registration order. A `Refused` outcome stops
/// the pass; `Modified` rewrites the value under evaluation and the pass
/// continues with the new value.
pub struct SafetyRuleEngine {
    rules: Vec<Arc<dyn SafetyRule>>,
    settings: EngineSettings,
}

impl SafetyRuleEngine {
    pub fn new(settings: EngineSettings) -> Self {
        SafetyRuleEngine { rules: Vec::new(), settings }
    }

    /// Register a rule, keeping the pipeline ordered. Stable with respect to
    /// registration order for equal (category, priority).
    pub fn register(&mut self, rule: Arc<dyn SafetyRule>) -> &mut Self {
        self.rules.push(rule);
        self.rules
            .sort_by(|a, b| b.category().cmp(&a.category()).then(a.priority().cmp(&b.priority())));
        self
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run the full pipeline against the context's proposed value.
    pub fn evaluate(&self, ctx: &SafetyContext) -> SafetyEvaluation {
        self.run(ctx, |_| true)
    }

    /// Restricted pass over `HARDCODED_SAFETY` rules only; used when the
    /// expression-backed rule set is unavailable.
    pub fn evaluate_hardcoded_only(&self, ctx: &SafetyContext) -> SafetyEvaluation {
        self.run(ctx, |rule| rule.category() == RuleCategory::HardcodedSafety)
    }

    fn run<F>(&self, ctx: &SafetyContext, include: F) -> SafetyEvaluation
    where
        F: Fn(&dyn SafetyRule) -> bool,
    {
        let started = Instant::now();
        let proposed = ctx.proposed;
        let mut current = proposed;
        let mut evaluated: Vec<String> = Vec::new();
        let mut modified_by: Vec<String> = Vec::new();
        let mut last_reason = String::new();

        for rule in &self.rules {
            if !include(rule.as_ref()) {
                continue;
            }
            let rule_ctx = ctx.with_proposed(current);
            if !rule.applies_to(&rule_ctx) {
                continue;
            }
            evaluated.push(rule.id().to_string());
            counter!("rules.evaluated").increment(1);

            match rule.evaluate(&rule_ctx) {
                Ok(RuleOutcome::Accepted) => {}
                Ok(RuleOutcome::Refused { reason, detail }) => {
                    debug!(rule_id = rule.id(), reason = %reason, "rule refused value");
                    counter!("rules.refused").increment(1);
                    histogram!("evaluation.duration").record(started.elapsed().as_secs_f64());
                    return SafetyEvaluation {
                        result: SafetyEvaluationResult::Refused {
                            rule_id: rule.id().to_string(),
                            reason,
                            detail,
                        },
                        evaluated,
                    };
                }
                Ok(RuleOutcome::Modified { value, reason }) => {
                    debug!(rule_id = rule.id(), from = %current, to = %value, "rule modified value");
                    counter!("rules.modified").increment(1);
                    current = value;
                    modified_by.push(rule.id().to_string());
                    last_reason = reason;
                }
                // Fail closed: an erroring rule refuses the value, unless the
                // engine was explicitly configured to fail open.
                Err(e) => {
                    if self.settings.fail_open {
                        warn!(rule_id = rule.id(), error = %e, "rule errored; failing open");
                        continue;
                    }
                    warn!(rule_id = rule.id(), error = %e, "rule errored; failing closed");
                    counter!("rules.refused").increment(1);
                    histogram!("evaluation.duration").record(started.elapsed().as_secs_f64());
                    return SafetyEvaluation {
                        result: SafetyEvaluationResult::Refused {
                            rule_id: rule.id().to_string(),
                            reason: "evaluation failed".into(),
                            detail: Some(e.to_string()),
                        },
                        evaluated,
                    };
                }
            }
        }

        histogram!("evaluation.duration").record(started.elapsed().as_secs_f64());
        let result = if current == proposed {
            counter!("rules.accepted").increment(1);
            SafetyEvaluationResult::Accepted
        } else {
            SafetyEvaluationResult::Modified {
                original: proposed,
                value: current,
                modified_by,
                reason: last_reason,
            }
        };
        SafetyEvaluation { result, evaluated }
    }
}
