use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Last-value cache of sensor telemetry, keyed by full topic path.
///
/// The coordinator folds a snapshot of this map into every
/// `SafetyContext.metadata`, which is how expression rules see live sensor
/// readings (e.g. `metadata['esp.dht22.water.temperature'] > 80`). A reading
/// of `null` records a sensor that reported but could not be parsed.
#[derive(Clone, Default)]
pub struct SensorReadings {
    inner: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl SensorReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, topic_key: impl Into<String>, value: Option<f64>) {
        let json = value.map(|v| serde_json::json!(v)).unwrap_or(serde_json::Value::Null);
        let mut guard = self.inner.write().expect("sensor cache lock poisoned");
        guard.insert(topic_key.into(), json);
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        let guard = self.inner.read().expect("sensor cache lock poisoned");
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_snapshots() {
        let readings = SensorReadings::new();
        readings.record("esp.dht22.water.temperature", Some(82.5));
        readings.record("esp.dht22.room.temperature", None);

        let snap = readings.snapshot();
        assert_eq!(snap.get("esp.dht22.water.temperature"), Some(&serde_json::json!(82.5)));
        assert_eq!(snap.get("esp.dht22.room.temperature"), Some(&serde_json::Value::Null));
    }
}
