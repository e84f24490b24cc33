use std::path::{Path, PathBuf};

use hearth_rules::RuleDefinition;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redb,
    Postgres,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redb_path: PathBuf,
    pub postgres_url: Option<String>,
}

/// Fully-resolved service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_addr: String,
    pub store: StoreSettings,
    pub reconcile_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub marker_ttl_secs: u64,
    pub event_queue_capacity: usize,
    pub listener_concurrency: usize,
    pub max_fan_speed: u8,
    pub fail_open: bool,
    pub audit_max_entries: usize,
    pub rules_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "127.0.0.1:8080".into(),
            store: StoreSettings {
                backend: StoreBackend::Memory,
                redb_path: PathBuf::from("data/twins.redb"),
                postgres_url: None,
            },
            reconcile_interval_secs: 5,
            sweep_interval_secs: 60,
            marker_ttl_secs: 300,
            event_queue_capacity: 100,
            listener_concurrency: 8,
            max_fan_speed: 4,
            fail_open: false,
            audit_max_entries: 10_000,
            rules_file: None,
        }
    }
}

/// Load settings from a YAML file, filling every omitted field with its
/// default. Relative paths inside the file resolve against the file's parent
/// directory.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawSettings =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
    debug!(path = %path.display(), "loaded settings file");

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let defaults = Settings::default();

    let backend = match raw.store.backend.as_deref() {
        None | Some("memory") => StoreBackend::Memory,
        Some("redb") => StoreBackend::Redb,
        Some("postgres") => StoreBackend::Postgres,
        Some(other) => {
            return Err(ConfigError::Invalid {
                path: path.display().to_string(),
                message: format!("unknown store backend '{other}'"),
            })
        }
    };
    if backend == StoreBackend::Postgres && raw.store.postgres_url.is_none() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: "store.postgres_url is required for the postgres backend".into(),
        });
    }

    let max_fan_speed = raw.max_fan_speed.unwrap_or(defaults.max_fan_speed);
    if max_fan_speed > 4 {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: format!("max_fan_speed {max_fan_speed} exceeds the hardware range 0..=4"),
        });
    }

    Ok(Settings {
        listen_addr: raw.listen_addr.unwrap_or(defaults.listen_addr),
        store: StoreSettings {
            backend,
            redb_path: raw
                .store
                .redb_path
                .map(|p| resolve(base, &p))
                .unwrap_or(defaults.store.redb_path),
            postgres_url: raw.store.postgres_url,
        },
        reconcile_interval_secs: raw
            .reconcile_interval_secs
            .unwrap_or(defaults.reconcile_interval_secs),
        sweep_interval_secs: raw.sweep_interval_secs.unwrap_or(defaults.sweep_interval_secs),
        marker_ttl_secs: raw.marker_ttl_secs.unwrap_or(defaults.marker_ttl_secs),
        event_queue_capacity: raw
            .event_queue_capacity
            .unwrap_or(defaults.event_queue_capacity),
        listener_concurrency: raw
            .listener_concurrency
            .unwrap_or(defaults.listener_concurrency),
        max_fan_speed,
        fail_open: raw.fail_open.unwrap_or(defaults.fail_open),
        audit_max_entries: raw.audit_max_entries.unwrap_or(defaults.audit_max_entries),
        rules_file: raw.rules_file.map(|p| resolve(base, &p)),
    })
}

fn resolve(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load the configurable safety-rule definitions (a YAML list).
pub fn load_rules(path: &Path) -> Result<Vec<RuleDefinition>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let rules: Vec<RuleDefinition> =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
    debug!(path = %path.display(), count = rules.len(), "loaded rule definitions");
    Ok(rules)
}
