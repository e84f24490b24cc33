use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device id '{0}': expected '<controllerId>:<componentId>' with both parts non-empty")]
    InvalidDeviceId(String),

    #[error("controller id must not contain ':': {0}")]
    ControllerIdContainsSeparator(String),

    #[error("fan speed {0} out of range 0..=4")]
    FanSpeedOutOfRange(u8),

    #[error("value {value} is not valid for device type {device_type}")]
    TypeValueMismatch { device_type: String, value: String },

    #[error("device type {0} does not carry a settable value")]
    NotSettable(String),

    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("unknown override category: {0}")]
    UnknownOverrideCategory(String),

    #[error("cannot parse '{payload}' as a {device_type} value")]
    InvalidValuePayload { device_type: String, payload: String },
}
