use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Identity of a single controllable or observable component: the controller
/// that hosts it plus the component name on that controller.
///
/// Wire form is `"<controllerId>:<componentId>"`. The controller part must not
/// contain `:` so the wire form round-trips unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    controller: String,
    component: String,
}

impl DeviceId {
    pub fn new(
        controller: impl Into<String>,
        component: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let controller = controller.into();
        let component = component.into();
        if controller.is_empty() || component.is_empty() {
            return Err(DomainError::InvalidDeviceId(format!(
                "{controller}:{component}"
            )));
        }
        if controller.contains(':') {
            return Err(DomainError::ControllerIdContainsSeparator(controller));
        }
        Ok(DeviceId { controller, component })
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.component)
    }
}

impl FromStr for DeviceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((controller, component)) => DeviceId::new(controller, component),
            None => Err(DomainError::InvalidDeviceId(s.to_string())),
        }
    }
}

// Serialized as the wire form so a DeviceId can key JSON maps.
impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ── Device types ──────────────────────────────────────────────────────────────

/// Whether a device is driven by the control plane or only observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Relay,
    Fan,
    TemperatureSensor,
}

impl DeviceType {
    pub fn capability(&self) -> Capability {
        match self {
            DeviceType::Relay | DeviceType::Fan => Capability::Output,
            DeviceType::TemperatureSensor => Capability::Input,
        }
    }

    /// Only output devices participate in reconciliation.
    pub fn is_output(&self) -> bool {
        self.capability() == Capability::Output
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Relay => "RELAY",
            DeviceType::Fan => "FAN",
            DeviceType::TemperatureSensor => "TEMPERATURE_SENSOR",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self, DomainError> {
        match s {
            "RELAY" => Ok(DeviceType::Relay),
            "FAN" => Ok(DeviceType::Fan),
            "TEMPERATURE_SENSOR" => Ok(DeviceType::TemperatureSensor),
            other => Err(DomainError::UnknownDeviceType(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// Fan level, 0 (off) through 4 (full). Range is enforced at construction and
/// during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FanSpeed(u8);

impl FanSpeed {
    pub const MAX: u8 = 4;

    pub fn new(speed: u8) -> Result<Self, DomainError> {
        if speed > Self::MAX {
            return Err(DomainError::FanSpeedOutOfRange(speed));
        }
        Ok(FanSpeed(speed))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for FanSpeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        FanSpeed::new(raw).map_err(D::Error::custom)
    }
}

/// A concrete settable value. The variant carries the device type it is valid
/// for; state wrappers check the pairing via [`DeviceValue::matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceValue {
    Relay(bool),
    Fan(FanSpeed),
}

impl DeviceValue {
    pub fn relay(on: bool) -> Self {
        DeviceValue::Relay(on)
    }

    pub fn fan(speed: u8) -> Result<Self, DomainError> {
        Ok(DeviceValue::Fan(FanSpeed::new(speed)?))
    }

    /// The device type this value's variant belongs to.
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceValue::Relay(_) => DeviceType::Relay,
            DeviceValue::Fan(_) => DeviceType::Fan,
        }
    }

    /// True when this value is of the variant the given device type carries.
    pub fn matches(&self, device_type: DeviceType) -> bool {
        matches!(
            (self, device_type),
            (DeviceValue::Relay(_), DeviceType::Relay) | (DeviceValue::Fan(_), DeviceType::Fan)
        )
    }

    /// ASCII payload form used on the command and feedback topics.
    pub fn as_wire(&self) -> String {
        match self {
            DeviceValue::Relay(on) => on.to_string(),
            DeviceValue::Fan(speed) => speed.to_string(),
        }
    }

    /// Parse an ASCII payload for the given device type.
    ///
    /// Relays accept `true`/`false` and the firmware shorthand `1`/`0`.
    pub fn parse_wire(device_type: DeviceType, payload: &str) -> Result<Self, DomainError> {
        let payload = payload.trim();
        match device_type {
            DeviceType::Relay => match payload {
                "true" | "1" => Ok(DeviceValue::Relay(true)),
                "false" | "0" => Ok(DeviceValue::Relay(false)),
                _ => Err(DomainError::InvalidValuePayload {
                    device_type: device_type.to_string(),
                    payload: payload.to_string(),
                }),
            },
            DeviceType::Fan => payload
                .parse::<u8>()
                .ok()
                .and_then(|v| FanSpeed::new(v).ok())
                .map(DeviceValue::Fan)
                .ok_or_else(|| DomainError::InvalidValuePayload {
                    device_type: device_type.to_string(),
                    payload: payload.to_string(),
                }),
            DeviceType::TemperatureSensor => {
                Err(DomainError::NotSettable(device_type.to_string()))
            }
        }
    }
}

impl fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceValue::Relay(on) => write!(f, "Relay({on})"),
            DeviceValue::Fan(speed) => write!(f, "Fan({speed})"),
        }
    }
}

fn check_pairing(
    device_type: DeviceType,
    value: &DeviceValue,
) -> Result<(), DomainError> {
    if !value.matches(device_type) {
        return Err(DomainError::TypeValueMismatch {
            device_type: device_type.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

// ── Twin states ───────────────────────────────────────────────────────────────

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIntent {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub value: DeviceValue,
    pub requested_at: DateTime<Utc>,
}

impl UserIntent {
    pub fn new(
        id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
        requested_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        check_pairing(device_type, &value)?;
        Ok(UserIntent { id, device_type, value, requested_at })
    }
}

/// What the device last told us.
///
/// `known = false` means the device has not yet reported; such a state carries
/// no evidence of convergence even if a stale value is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedDeviceState {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub value: Option<DeviceValue>,
    pub reported_at: DateTime<Utc>,
    pub known: bool,
}

impl ReportedDeviceState {
    pub fn known(
        id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
        reported_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        check_pairing(device_type, &value)?;
        Ok(ReportedDeviceState { id, device_type, value: Some(value), reported_at, known: true })
    }

    pub fn unknown(id: DeviceId, device_type: DeviceType, at: DateTime<Utc>) -> Self {
        ReportedDeviceState { id, device_type, value: None, reported_at: at, known: false }
    }
}

/// The target the reconciler drives the device toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredDeviceState {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub value: DeviceValue,
}

impl DesiredDeviceState {
    pub fn new(
        id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
    ) -> Result<Self, DomainError> {
        check_pairing(device_type, &value)?;
        Ok(DesiredDeviceState { id, device_type, value })
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Point-in-time view of the full twin. Any of the three fields may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTwinSnapshot {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub intent: Option<UserIntent>,
    pub reported: Option<ReportedDeviceState>,
    pub desired: Option<DesiredDeviceState>,
}

impl DeviceTwinSnapshot {
    pub fn empty(id: DeviceId, device_type: DeviceType) -> Self {
        DeviceTwinSnapshot { id, device_type, intent: None, reported: None, desired: None }
    }

    /// Convergence: the device has reported, and the reported value equals the
    /// desired value. Unknown reported state is never converged.
    pub fn is_converged(&self) -> bool {
        match (&self.reported, &self.desired) {
            (Some(reported), Some(desired)) => {
                reported.known && reported.value.as_ref() == Some(&desired.value)
            }
            _ => false,
        }
    }

    /// Type–value consistency across all present fields.
    pub fn is_consistent(&self) -> bool {
        self.intent.as_ref().map_or(true, |i| i.device_type == self.device_type)
            && self.reported.as_ref().map_or(true, |r| r.device_type == self.device_type)
            && self.desired.as_ref().map_or(true, |d| d.device_type == self.device_type)
    }
}
