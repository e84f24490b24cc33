use chrono::{DateTime, Utc};
use hearth_domain::{
    CorrelationId, DesiredDeviceState, DeviceId, DeviceType, DeviceValue, Override,
    OverrideCategory, OverrideTarget, ReportedDeviceState, UserIntent,
};
use serde::{Deserialize, Serialize};

/// A raw inbound frame as handed over by the wire adapter: topic path plus
/// ASCII payload, untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackFrame {
    pub topic: String,
    pub payload: String,
    /// Broker-assigned message id, when the transport provides one. Feeds the
    /// idempotency key.
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// An outbound frame for the wire adapter to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub topic: String,
    pub payload: String,
}

/// Everything that travels on the in-process bus. Each variant carries the
/// correlation id of the inbound cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    UserIntentChanged {
        intent: UserIntent,
        correlation: CorrelationId,
    },
    ActuatorFeedbackReceived {
        frame: FeedbackFrame,
        correlation: CorrelationId,
    },
    ReportedStateChanged {
        reported: ReportedDeviceState,
        correlation: CorrelationId,
    },
    DesiredStateCalculated {
        desired: DesiredDeviceState,
        previous: Option<DeviceValue>,
        reason: String,
        correlation: CorrelationId,
    },
    OverrideApplied {
        applied: Override,
        correlation: CorrelationId,
    },
    OverrideCancelled {
        target: OverrideTarget,
        category: OverrideCategory,
        correlation: CorrelationId,
    },
    OverrideExpired {
        expired: Override,
        correlation: CorrelationId,
    },
    DeviceCommand {
        id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
        correlation: CorrelationId,
    },
}

impl Event {
    pub fn correlation(&self) -> CorrelationId {
        match self {
            Event::UserIntentChanged { correlation, .. }
            | Event::ActuatorFeedbackReceived { correlation, .. }
            | Event::ReportedStateChanged { correlation, .. }
            | Event::DesiredStateCalculated { correlation, .. }
            | Event::OverrideApplied { correlation, .. }
            | Event::OverrideCancelled { correlation, .. }
            | Event::OverrideExpired { correlation, .. }
            | Event::DeviceCommand { correlation, .. } => *correlation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::UserIntentChanged { .. } => "user_intent_changed",
            Event::ActuatorFeedbackReceived { .. } => "actuator_feedback_received",
            Event::ReportedStateChanged { .. } => "reported_state_changed",
            Event::DesiredStateCalculated { .. } => "desired_state_calculated",
            Event::OverrideApplied { .. } => "override_applied",
            Event::OverrideCancelled { .. } => "override_cancelled",
            Event::OverrideExpired { .. } => "override_expired",
            Event::DeviceCommand { .. } => "device_command",
        }
    }
}
