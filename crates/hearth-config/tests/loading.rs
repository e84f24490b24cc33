use std::io::Write;

use hearth_config::{load_rules, load_settings, ConfigError, Settings, StoreBackend};

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn empty_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "hearth.yml", "{}");
    let settings = load_settings(&path).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn fields_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "hearth.yml",
        r#"
listen_addr: 0.0.0.0:9090
reconcile_interval_secs: 2
max_fan_speed: 3
store:
  backend: redb
  redb_path: state/twins.redb
rules_file: rules.yml
"#,
    );
    let settings = load_settings(&path).unwrap();
    assert_eq!(settings.listen_addr, "0.0.0.0:9090");
    assert_eq!(settings.reconcile_interval_secs, 2);
    assert_eq!(settings.max_fan_speed, 3);
    assert_eq!(settings.store.backend, StoreBackend::Redb);
    // Relative paths resolve against the settings file.
    assert_eq!(settings.store.redb_path, dir.path().join("state/twins.redb"));
    assert_eq!(settings.rules_file, Some(dir.path().join("rules.yml")));
}

#[test]
fn postgres_backend_requires_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "hearth.yml", "store:\n  backend: postgres\n");
    assert!(matches!(load_settings(&path), Err(ConfigError::Invalid { .. })));

    let path = write_file(
        &dir,
        "ok.yml",
        "store:\n  backend: postgres\n  postgres_url: postgres://localhost/hearth\n",
    );
    let settings = load_settings(&path).unwrap();
    assert_eq!(settings.store.backend, StoreBackend::Postgres);
}

#[test]
fn unknown_backend_and_fan_range_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "bad-backend.yml", "store:\n  backend: etcd\n");
    assert!(matches!(load_settings(&path), Err(ConfigError::Invalid { .. })));

    let path = write_file(&dir, "bad-fan.yml", "max_fan_speed: 9\n");
    assert!(matches!(load_settings(&path), Err(ConfigError::Invalid { .. })));
}

#[test]
fn unknown_keys_are_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "typo.yml", "recncile_interval_secs: 2\n");
    assert!(matches!(load_settings(&path), Err(ConfigError::YamlParse { .. })));
}

#[test]
fn rule_definitions_load_and_compile() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "rules.yml",
        r#"
- id: night-quiet
  name: night quiet hours
  category: SYSTEM_SAFETY
  priority: 10
  enabled: true
  condition: "deviceType == 'FAN' && proposedValue > 2"
  action: MODIFY
  expression: "2"
  reason: quiet hours
  version: 1
- id: hard-stop
  name: disabled emergency stop
  category: SYSTEM_SAFETY
  priority: 5
  enabled: false
  condition: "true"
  action: REFUSE
  reason: manual emergency stop
"#,
    );
    let rules = load_rules(&path).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id, "night-quiet");
    assert!(!rules[1].enabled);

    for def in rules {
        hearth_rules::ExpressionRule::compile(def).unwrap();
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_settings(&dir.path().join("absent.yml")),
        Err(ConfigError::Io { .. })
    ));
}
