pub mod audit;
pub mod device;
pub mod error;
pub mod overrides;
pub mod safety;
pub mod system;

#[cfg(test)]
mod tests;

pub use audit::{AuditEntry, CorrelationId, DecisionType};
pub use device::{
    Capability, DesiredDeviceState, DeviceId, DeviceTwinSnapshot, DeviceType, DeviceValue,
    FanSpeed, ReportedDeviceState, UserIntent,
};
pub use error::DomainError;
pub use overrides::{Override, OverrideCategory, OverrideScope, OverrideTarget};
pub use safety::{RuleCategory, SafetyContext};
pub use system::{FunctionalSystem, SystemType};
