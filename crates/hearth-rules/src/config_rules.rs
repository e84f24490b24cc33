use std::time::{Duration, Instant};

use hearth_domain::{DeviceType, DeviceValue, RuleCategory, SafetyContext};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::expr::{Bindings, Expression, Value};
use crate::rule::{RuleOutcome, SafetyRule};

/// Hard ceiling on one rule's expression evaluation.
pub const EVAL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Accept,
    Refuse,
    Modify,
}

/// One operator-authored rule as persisted/configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RuleCategory,
    pub priority: i32,
    pub enabled: bool,
    /// Guard expression; the rule fires only when it evaluates to `true`.
    pub condition: String,
    pub action: RuleAction,
    /// Replacement-value expression, required when `action` is `MODIFY`.
    #[serde(default)]
    pub expression: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub version: u64,
}

/// A compiled configurable rule: the definition plus its parsed expressions.
///
/// Expressions run in the sandboxed evaluator with the fixed binding set; an
/// evaluator error propagates as `Err` and the engine turns it into a
/// fail-closed refusal (or a skip under `fail_open`).
pub struct ExpressionRule {
    def: RuleDefinition,
    condition: Expression,
    expression: Option<Expression>,
    timeout: Duration,
}

impl ExpressionRule {
    pub fn compile(def: RuleDefinition) -> Result<Self, RuleError> {
        Self::compile_with_timeout(def, EVAL_TIMEOUT)
    }

    pub fn compile_with_timeout(
        def: RuleDefinition,
        timeout: Duration,
    ) -> Result<Self, RuleError> {
        if !matches!(def.category, RuleCategory::SystemSafety | RuleCategory::HardcodedSafety) {
            return Err(RuleError::InvalidCategory(def.category.to_string()));
        }
        let condition = Expression::parse(&def.condition)?;
        let expression = match (&def.action, &def.expression) {
            (RuleAction::Modify, Some(src)) => Some(Expression::parse(src)?),
            (RuleAction::Modify, None) => return Err(RuleError::MissingExpression),
            (_, Some(src)) => Some(Expression::parse(src)?),
            (_, None) => None,
        };
        Ok(ExpressionRule { def, condition, expression, timeout })
    }

    pub fn definition(&self) -> &RuleDefinition {
        &self.def
    }

    fn value_for_device(
        &self,
        device_type: DeviceType,
        value: Value,
    ) -> Result<DeviceValue, RuleError> {
        let invalid = |value: &Value| RuleError::InvalidValue {
            device_type: device_type.to_string(),
            value: format!("{value:?}"),
        };
        match (device_type, &value) {
            (DeviceType::Relay, Value::Bool(on)) => Ok(DeviceValue::relay(*on)),
            (DeviceType::Fan, Value::Int(speed)) => u8::try_from(*speed)
                .ok()
                .and_then(|s| DeviceValue::fan(s).ok())
                .ok_or_else(|| invalid(&value)),
            _ => Err(invalid(&value)),
        }
    }
}

impl SafetyRule for ExpressionRule {
    fn id(&self) -> &str {
        &self.def.id
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn category(&self) -> RuleCategory {
        self.def.category
    }

    fn priority(&self) -> i32 {
        self.def.priority
    }

    fn applies_to(&self, _ctx: &SafetyContext) -> bool {
        // The condition itself runs inside evaluate() so that its errors go
        // through the engine's fail-closed path rather than silently skipping.
        self.def.enabled
    }

    fn evaluate(&self, ctx: &SafetyContext) -> Result<RuleOutcome, RuleError> {
        let bindings = Bindings::for_context(ctx);
        let deadline = Instant::now() + self.timeout;

        match self.condition.eval(&bindings, deadline)? {
            Value::Bool(false) => return Ok(RuleOutcome::Accepted),
            Value::Bool(true) => {}
            _ => return Err(RuleError::NonBooleanCondition),
        }

        match self.def.action {
            RuleAction::Accept => Ok(RuleOutcome::Accepted),
            RuleAction::Refuse => Ok(RuleOutcome::Refused {
                reason: self.def.reason.clone(),
                detail: Some(format!("condition: {}", self.condition.source())),
            }),
            RuleAction::Modify => {
                let expr = self.expression.as_ref().ok_or(RuleError::MissingExpression)?;
                let produced = expr.eval(&bindings, deadline)?;
                let value = self.value_for_device(ctx.device_type, produced)?;
                if value == ctx.proposed {
                    Ok(RuleOutcome::Accepted)
                } else {
                    Ok(RuleOutcome::Modified { value, reason: self.def.reason.clone() })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::DeviceId;

    fn fan_ctx(speed: u8) -> SafetyContext {
        SafetyContext::new(
            DeviceId::new("esp", "fan").unwrap(),
            DeviceType::Fan,
            DeviceValue::fan(speed).unwrap(),
        )
    }

    fn definition(condition: &str, action: RuleAction, expression: Option<&str>) -> RuleDefinition {
        RuleDefinition {
            id: "night-quiet".into(),
            name: "night quiet hours".into(),
            description: String::new(),
            category: RuleCategory::SystemSafety,
            priority: 10,
            enabled: true,
            condition: condition.into(),
            action,
            expression: expression.map(String::from),
            reason: "quiet hours".into(),
            version: 1,
        }
    }

    #[test]
    fn false_condition_accepts() {
        let rule = ExpressionRule::compile(definition(
            "deviceType == 'RELAY'",
            RuleAction::Refuse,
            None,
        ))
        .unwrap();
        assert_eq!(rule.evaluate(&fan_ctx(2)).unwrap(), RuleOutcome::Accepted);
    }

    #[test]
    fn refuse_action_refuses_when_condition_holds() {
        let rule = ExpressionRule::compile(definition(
            "deviceType == 'FAN' && proposedValue > 2",
            RuleAction::Refuse,
            None,
        ))
        .unwrap();
        match rule.evaluate(&fan_ctx(3)).unwrap() {
            RuleOutcome::Refused { reason, .. } => assert_eq!(reason, "quiet hours"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn modify_action_produces_typed_value() {
        let rule = ExpressionRule::compile(definition(
            "proposedValue > 2",
            RuleAction::Modify,
            Some("2"),
        ))
        .unwrap();
        match rule.evaluate(&fan_ctx(4)).unwrap() {
            RuleOutcome::Modified { value, .. } => {
                assert_eq!(value, DeviceValue::fan(2).unwrap());
            }
            other => panic!("expected modification, got {other:?}"),
        }
        // Producing the proposed value itself collapses to Accepted.
        assert_eq!(rule.evaluate(&fan_ctx(2)).unwrap(), RuleOutcome::Accepted);
    }

    #[test]
    fn modify_without_expression_fails_compile() {
        assert!(matches!(
            ExpressionRule::compile(definition("true", RuleAction::Modify, None)),
            Err(RuleError::MissingExpression)
        ));
    }

    #[test]
    fn out_of_band_category_fails_compile() {
        let mut def = definition("true", RuleAction::Refuse, None);
        def.category = RuleCategory::Manual;
        assert!(matches!(
            ExpressionRule::compile(def),
            Err(RuleError::InvalidCategory(_))
        ));
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let rule =
            ExpressionRule::compile(definition("1 + 1", RuleAction::Refuse, None)).unwrap();
        assert!(matches!(
            rule.evaluate(&fan_ctx(1)),
            Err(RuleError::NonBooleanCondition)
        ));
    }

    #[test]
    fn expression_value_must_fit_device_type() {
        let rule = ExpressionRule::compile(definition(
            "true",
            RuleAction::Modify,
            Some("'loud'"),
        ))
        .unwrap();
        assert!(matches!(
            rule.evaluate(&fan_ctx(1)),
            Err(RuleError::InvalidValue { .. })
        ));

        let rule = ExpressionRule::compile(definition(
            "true",
            RuleAction::Modify,
            Some("99"),
        ))
        .unwrap();
        assert!(matches!(
            rule.evaluate(&fan_ctx(1)),
            Err(RuleError::InvalidValue { .. })
        ));
    }

    #[test]
    fn disabled_rule_does_not_apply() {
        let mut def = definition("true", RuleAction::Refuse, None);
        def.enabled = false;
        let rule = ExpressionRule::compile(def).unwrap();
        assert!(!rule.applies_to(&fan_ctx(1)));
    }

    #[test]
    fn metadata_driven_interlock() {
        // A water-temperature interlock expressed as configuration.
        let rule = ExpressionRule::compile(definition(
            "deviceType == 'FAN' && metadata.waterTemp != null && metadata.waterTemp > 80 && proposedValue == 0",
            RuleAction::Modify,
            Some("1"),
        ))
        .unwrap();

        let mut ctx = fan_ctx(0);
        ctx.metadata.insert("waterTemp".into(), serde_json::json!(85.0));
        match rule.evaluate(&ctx).unwrap() {
            RuleOutcome::Modified { value, .. } => {
                assert_eq!(value, DeviceValue::fan(1).unwrap());
            }
            other => panic!("expected modification, got {other:?}"),
        }

        ctx.metadata.insert("waterTemp".into(), serde_json::json!(40.0));
        assert_eq!(rule.evaluate(&ctx).unwrap(), RuleOutcome::Accepted);
    }
}
