//! Topic-path and payload codec for the device wire protocol.
//!
//! Inbound:
//! - `<controllerId>.<handlerType>.<componentId>.state`: actuator feedback,
//!   ASCII value payload.
//! - `<controllerId>.<sensorType>.<sensorName>.temperature`: sensor reading,
//!   ASCII decimal payload or a parse-error sentinel.
//!
//! Outbound: `<controllerId>.<handlerType>.<componentId>.set`, ASCII value
//! (`true`/`false` for relays, `0`–`4` for fans).

use hearth_domain::{DeviceId, DeviceType, DeviceValue};

use crate::error::EngineError;
use crate::events::CommandFrame;

/// Payload devices send when a sensor read failed on their side.
const PARSE_ERROR_SENTINEL: &str = "U";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ActuatorFeedback {
        id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
    },
    Temperature {
        /// Full topic path, used as the metadata key for rule expressions.
        topic_key: String,
        celsius: Option<f64>,
    },
}

fn handler_to_device_type(handler: &str) -> Option<DeviceType> {
    match handler {
        "fan" => Some(DeviceType::Fan),
        "digital_output" => Some(DeviceType::Relay),
        _ => None,
    }
}

fn device_type_to_handler(device_type: DeviceType) -> Option<&'static str> {
    match device_type {
        DeviceType::Fan => Some("fan"),
        DeviceType::Relay => Some("digital_output"),
        DeviceType::TemperatureSensor => None,
    }
}

/// Decode an inbound topic + payload pair.
pub fn parse_inbound(topic: &str, payload: &str) -> Result<InboundFrame, EngineError> {
    let segments: Vec<&str> = topic.split('.').collect();
    let [controller, middle, component, leaf] = segments.as_slice() else {
        return Err(EngineError::Topic(topic.to_string()));
    };
    if controller.is_empty() || middle.is_empty() || component.is_empty() {
        return Err(EngineError::Topic(topic.to_string()));
    }

    match *leaf {
        "state" => {
            let device_type = handler_to_device_type(middle)
                .ok_or_else(|| EngineError::Topic(topic.to_string()))?;
            let id = DeviceId::new(*controller, *component)?;
            let value = DeviceValue::parse_wire(device_type, payload)
                .map_err(|e| EngineError::Validation(e.to_string()))?;
            Ok(InboundFrame::ActuatorFeedback { id, device_type, value })
        }
        "temperature" => {
            let trimmed = payload.trim();
            let celsius = if trimmed == PARSE_ERROR_SENTINEL {
                None
            } else {
                trimmed.parse::<f64>().ok()
            };
            Ok(InboundFrame::Temperature { topic_key: topic.to_string(), celsius })
        }
        _ => Err(EngineError::Topic(topic.to_string())),
    }
}

/// The command topic for an output device.
pub fn command_topic(id: &DeviceId, device_type: DeviceType) -> Result<String, EngineError> {
    let handler = device_type_to_handler(device_type).ok_or_else(|| {
        EngineError::Validation(format!("{device_type} devices cannot receive commands"))
    })?;
    Ok(format!("{}.{}.{}.set", id.controller(), handler, id.component()))
}

/// Assemble a full command frame for the wire adapter.
pub fn command_frame(
    id: &DeviceId,
    device_type: DeviceType,
    value: &DeviceValue,
) -> Result<CommandFrame, EngineError> {
    Ok(CommandFrame { topic: command_topic(id, device_type)?, payload: value.as_wire() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relay_feedback() {
        let frame = parse_inbound("ctl.digital_output.light.state", "1").unwrap();
        assert_eq!(
            frame,
            InboundFrame::ActuatorFeedback {
                id: DeviceId::new("ctl", "light").unwrap(),
                device_type: DeviceType::Relay,
                value: DeviceValue::relay(true),
            }
        );
    }

    #[test]
    fn parses_fan_feedback() {
        let frame = parse_inbound("esp.fan.exhaust.state", "3").unwrap();
        assert_eq!(
            frame,
            InboundFrame::ActuatorFeedback {
                id: DeviceId::new("esp", "exhaust").unwrap(),
                device_type: DeviceType::Fan,
                value: DeviceValue::fan(3).unwrap(),
            }
        );
    }

    #[test]
    fn parses_temperature_and_sentinel() {
        let frame = parse_inbound("esp.dht22.water.temperature", "82.5").unwrap();
        assert_eq!(
            frame,
            InboundFrame::Temperature {
                topic_key: "esp.dht22.water.temperature".into(),
                celsius: Some(82.5),
            }
        );

        let frame = parse_inbound("esp.dht22.water.temperature", "U").unwrap();
        assert_eq!(
            frame,
            InboundFrame::Temperature {
                topic_key: "esp.dht22.water.temperature".into(),
                celsius: None,
            }
        );
    }

    #[test]
    fn rejects_malformed_topics() {
        assert!(parse_inbound("too.short.state", "1").is_err());
        assert!(parse_inbound("ctl.unknown_handler.x.state", "1").is_err());
        assert!(parse_inbound("ctl.fan.x.unknown_leaf", "1").is_err());
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(parse_inbound("ctl.fan.x.state", "9").is_err());
        assert!(parse_inbound("ctl.digital_output.x.state", "banana").is_err());
    }

    #[test]
    fn command_topic_round_trip() {
        let id = DeviceId::new("ctl", "light").unwrap();
        let frame = command_frame(&id, DeviceType::Relay, &DeviceValue::relay(true)).unwrap();
        assert_eq!(frame.topic, "ctl.digital_output.light.set");
        assert_eq!(frame.payload, "true");

        let fan = DeviceId::new("esp", "exhaust").unwrap();
        let frame =
            command_frame(&fan, DeviceType::Fan, &DeviceValue::fan(2).unwrap()).unwrap();
        assert_eq!(frame.topic, "esp.fan.exhaust.set");
        assert_eq!(frame.payload, "2");
    }

    #[test]
    fn sensors_cannot_be_commanded() {
        let id = DeviceId::new("esp", "probe").unwrap();
        assert!(command_topic(&id, DeviceType::TemperatureSensor).is_err());
    }
}
