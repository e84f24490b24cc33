use thiserror::Error;

/// Errors from the sandboxed expression evaluator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("evaluation exceeded its deadline")]
    Timeout,

    #[error("evaluation exceeded its step budget")]
    StepBudgetExceeded,

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("field access on a non-object value: .{0}")]
    FieldAccessOnNonObject(String),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("condition did not evaluate to a boolean")]
    NonBooleanCondition,

    #[error("MODIFY action requires an expression")]
    MissingExpression,

    #[error("rule category {0} cannot carry engine rules")]
    InvalidCategory(String),

    #[error("expression produced '{value}', not a valid {device_type} value")]
    InvalidValue { device_type: String, value: String },
}
