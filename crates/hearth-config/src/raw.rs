//! Serde-facing mirror of the settings file. Everything is optional here;
//! defaults are applied during conversion in [`crate::loader`].

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub store: RawStoreSettings,
    pub reconcile_interval_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub marker_ttl_secs: Option<u64>,
    pub event_queue_capacity: Option<usize>,
    pub listener_concurrency: Option<usize>,
    pub max_fan_speed: Option<u8>,
    pub fail_open: Option<bool>,
    pub audit_max_entries: Option<usize>,
    /// Path to the configurable safety-rule definitions, relative to the
    /// settings file.
    pub rules_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStoreSettings {
    /// `memory`, `redb` or `postgres`.
    pub backend: Option<String>,
    pub redb_path: Option<String>,
    pub postgres_url: Option<String>,
}
