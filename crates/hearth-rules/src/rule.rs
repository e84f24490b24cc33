use hearth_domain::{DeviceValue, RuleCategory, SafetyContext};

use crate::error::RuleError;

/// The verdict of a single rule on a proposed value.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Accepted,
    Refused { reason: String, detail: Option<String> },
    Modified { value: DeviceValue, reason: String },
}

/// A safety rule: judges a proposed device value in context.
///
/// Implementations are value types holding their configuration (hardcoded
/// rules) or a compiled expression pair ([`crate::ExpressionRule`]). Rules
/// never perform I/O; everything they may consult is in the
/// [`SafetyContext`].
pub trait SafetyRule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn category(&self) -> RuleCategory;

    /// Lower runs earlier within the same category.
    fn priority(&self) -> i32;

    /// Cheap pre-filter; a rule that does not apply is skipped entirely and
    /// not recorded as evaluated.
    fn applies_to(&self, ctx: &SafetyContext) -> bool;

    /// Judge the proposed value. An `Err` is converted by the engine into a
    /// fail-closed refusal (or a skip when the engine is configured to fail
    /// open).
    fn evaluate(&self, ctx: &SafetyContext) -> Result<RuleOutcome, RuleError>;

    /// A value the rule would accept instead of the refused one, if it can
    /// name one.
    fn suggest_correction(&self, _ctx: &SafetyContext) -> Option<DeviceValue> {
        None
    }
}
