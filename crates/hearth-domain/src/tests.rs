use chrono::Utc;
use uuid::Uuid;

use crate::audit::{AuditEntry, CorrelationId, DecisionType};
use crate::device::*;
use crate::overrides::*;
use crate::safety::RuleCategory;
use crate::system::{FunctionalSystem, SystemType};

fn id(controller: &str, component: &str) -> DeviceId {
    DeviceId::new(controller, component).unwrap()
}

#[test]
fn device_id_round_trips_through_wire_form() {
    let original = id("esp32-salotto", "pump");
    let parsed: DeviceId = original.to_string().parse().unwrap();
    assert_eq!(parsed, original);
    assert_eq!(parsed.controller(), "esp32-salotto");
    assert_eq!(parsed.component(), "pump");
}

#[test]
fn device_id_component_may_contain_separator() {
    let parsed: DeviceId = "ctl:zone:north".parse().unwrap();
    assert_eq!(parsed.controller(), "ctl");
    assert_eq!(parsed.component(), "zone:north");
    // Still round-trips: the first ':' is the only split point.
    assert_eq!(parsed.to_string().parse::<DeviceId>().unwrap(), parsed);
}

#[test]
fn device_id_rejects_empty_parts() {
    assert!(DeviceId::new("", "pump").is_err());
    assert!(DeviceId::new("ctl", "").is_err());
    assert!("nocolon".parse::<DeviceId>().is_err());
    assert!(":pump".parse::<DeviceId>().is_err());
}

#[test]
fn device_id_rejects_separator_in_controller() {
    assert!(DeviceId::new("a:b", "pump").is_err());
}

#[test]
fn device_id_serializes_as_wire_string() {
    let json = serde_json::to_string(&id("ctl", "fan")).unwrap();
    assert_eq!(json, "\"ctl:fan\"");
    let back: DeviceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id("ctl", "fan"));
}

#[test]
fn capability_matrix() {
    assert!(DeviceType::Relay.is_output());
    assert!(DeviceType::Fan.is_output());
    assert!(!DeviceType::TemperatureSensor.is_output());
}

#[test]
fn fan_speed_range_is_enforced() {
    assert!(DeviceValue::fan(0).is_ok());
    assert!(DeviceValue::fan(4).is_ok());
    assert!(DeviceValue::fan(5).is_err());
    // Deserialization goes through the same check.
    assert!(serde_json::from_str::<FanSpeed>("4").is_ok());
    assert!(serde_json::from_str::<FanSpeed>("9").is_err());
}

#[test]
fn type_value_pairing_is_enforced_by_wrappers() {
    let now = Utc::now();
    let fan_value = DeviceValue::fan(2).unwrap();
    assert!(UserIntent::new(id("c", "fan"), DeviceType::Fan, fan_value, now).is_ok());
    assert!(UserIntent::new(id("c", "fan"), DeviceType::Relay, fan_value, now).is_err());
    assert!(
        DesiredDeviceState::new(id("c", "light"), DeviceType::Fan, DeviceValue::relay(true))
            .is_err()
    );
}

#[test]
fn wire_payload_parsing() {
    assert_eq!(
        DeviceValue::parse_wire(DeviceType::Relay, "1").unwrap(),
        DeviceValue::relay(true)
    );
    assert_eq!(
        DeviceValue::parse_wire(DeviceType::Relay, "false").unwrap(),
        DeviceValue::relay(false)
    );
    assert_eq!(
        DeviceValue::parse_wire(DeviceType::Fan, "3").unwrap(),
        DeviceValue::fan(3).unwrap()
    );
    assert!(DeviceValue::parse_wire(DeviceType::Fan, "7").is_err());
    assert!(DeviceValue::parse_wire(DeviceType::Relay, "maybe").is_err());
    assert!(DeviceValue::parse_wire(DeviceType::TemperatureSensor, "21.5").is_err());
}

#[test]
fn convergence_requires_known_reported() {
    let now = Utc::now();
    let device = id("ctl", "light");
    let mut snap = DeviceTwinSnapshot::empty(device.clone(), DeviceType::Relay);
    snap.desired = Some(
        DesiredDeviceState::new(device.clone(), DeviceType::Relay, DeviceValue::relay(true))
            .unwrap(),
    );
    assert!(!snap.is_converged(), "no reported state yet");

    snap.reported = Some(ReportedDeviceState::unknown(device.clone(), DeviceType::Relay, now));
    assert!(!snap.is_converged(), "unknown reported is never convergence evidence");

    snap.reported = Some(
        ReportedDeviceState::known(device.clone(), DeviceType::Relay, DeviceValue::relay(true), now)
            .unwrap(),
    );
    assert!(snap.is_converged());

    snap.reported = Some(
        ReportedDeviceState::known(device, DeviceType::Relay, DeviceValue::relay(false), now)
            .unwrap(),
    );
    assert!(!snap.is_converged(), "diverged value");
}

#[test]
fn override_category_order_is_ascending_priority() {
    assert!(OverrideCategory::Manual < OverrideCategory::Scheduled);
    assert!(OverrideCategory::Scheduled < OverrideCategory::Maintenance);
    assert!(OverrideCategory::Maintenance < OverrideCategory::Emergency);
}

#[test]
fn rule_category_order_spans_intent_to_hardcoded() {
    assert!(RuleCategory::UserIntent < RuleCategory::Manual);
    assert!(RuleCategory::Emergency < RuleCategory::SystemSafety);
    assert!(RuleCategory::SystemSafety < RuleCategory::HardcodedSafety);
    assert_eq!(RuleCategory::from(OverrideCategory::Emergency), RuleCategory::Emergency);
}

#[test]
fn override_storage_id_combines_target_and_category() {
    let now = Utc::now();
    let ovr = Override::new(
        OverrideTarget::Device(id("esp", "pump")),
        OverrideCategory::Manual,
        DeviceValue::relay(false),
        "winter shutdown",
        "operator",
        now,
    );
    assert_eq!(ovr.id, "esp:pump:MANUAL");
    assert_eq!(ovr.scope(), OverrideScope::Device);
    assert!(!ovr.is_expired(now));
    assert!(ovr
        .clone()
        .with_expiry(now - chrono::Duration::seconds(1))
        .is_expired(now));
}

#[test]
fn system_version_bumps_on_mutation() {
    let now = Utc::now();
    let mut sys = FunctionalSystem::new(SystemType::Fireplace, "living room", now);
    assert_eq!(sys.version, 0);
    assert!(sys.add_device(id("esp", "fire"), now));
    assert_eq!(sys.version, 1);
    // Adding the same device again is a no-op.
    assert!(!sys.add_device(id("esp", "fire"), now));
    assert_eq!(sys.version, 1);
    assert!(sys.remove_device(&id("esp", "fire"), now));
    assert_eq!(sys.version, 2);
}

#[test]
fn audit_entry_builder_sets_fields() {
    let correlation = CorrelationId::new();
    let entry = AuditEntry::new(correlation, DecisionType::DesiredCalculated, "coordinator", Utc::now())
        .for_device(id("ctl", "light"))
        .for_system(Uuid::new_v4())
        .with_values(None, Some(DeviceValue::relay(true)))
        .with_reason("intent passthrough");
    assert_eq!(entry.correlation_id, correlation);
    assert_eq!(entry.decision, DecisionType::DesiredCalculated);
    assert_eq!(entry.new_value, Some(DeviceValue::relay(true)));
    assert!(entry.device_id.is_some());
}
