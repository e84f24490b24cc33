pub mod config_rules;
pub mod engine;
pub mod error;
pub mod expr;
pub mod hardcoded;
pub mod rule;

pub use config_rules::{ExpressionRule, RuleAction, RuleDefinition};
pub use engine::{EngineSettings, SafetyEvaluation, SafetyEvaluationResult, SafetyRuleEngine};
pub use error::{ExprError, RuleError};
pub use expr::{Bindings, Expression, Value};
pub use hardcoded::{FirePumpInterlock, MaxFanSpeed, PumpFireInterlock};
pub use rule::{RuleOutcome, SafetyRule};
