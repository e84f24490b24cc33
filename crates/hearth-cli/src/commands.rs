use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use hearth_config::{load_rules, load_settings, Settings, StoreBackend};
use hearth_domain::{AuditEntry, CorrelationId, DecisionType, DeviceId};
use hearth_engine::{
    AuditListener, CommandDispatchListener, DashboardForwarder, EventBus, EventDispatcher,
    EventListener, FeedbackProcessor, HealthGate, IdempotencyFilter, IntentIngress,
    LogCommandPublisher, OverrideExpirationSweeper, OverrideValidationPipeline,
    RecalculationListener, Reconciler, ReconciliationCoordinator, SensorReadings,
    StateCalculator,
};
use hearth_rules::{
    EngineSettings, ExpressionRule, FirePumpInterlock, MaxFanSpeed, PumpFireInterlock,
    SafetyRuleEngine,
};
use hearth_store::{
    AuditStore, InMemoryAuditStore, InMemoryMarkerStore, InMemoryOverrideStore,
    InMemorySystemRegistry, InMemoryTwinStore, OverrideStore, PostgresDocumentStore,
    RedbTwinStore, SystemRegistry, TwinStore, WriteThroughOverrideStore,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

struct Stores {
    twins: Arc<dyn TwinStore>,
    overrides: Arc<dyn OverrideStore>,
    registry: Arc<dyn SystemRegistry>,
    audit: Arc<dyn AuditStore>,
}

async fn open_stores(settings: &Settings) -> Result<Stores> {
    match settings.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory stores; state is lost on exit");
            Ok(Stores {
                twins: Arc::new(InMemoryTwinStore::new()),
                overrides: Arc::new(InMemoryOverrideStore::new()),
                registry: Arc::new(InMemorySystemRegistry::new()),
                audit: Arc::new(InMemoryAuditStore::new(settings.audit_max_entries)),
            })
        }
        StoreBackend::Redb => {
            info!(path = %settings.store.redb_path.display(), "using redb twin store");
            let twins = RedbTwinStore::open(&settings.store.redb_path)
                .with_context(|| {
                    format!("failed to open {}", settings.store.redb_path.display())
                })?;
            Ok(Stores {
                twins: Arc::new(twins),
                overrides: Arc::new(InMemoryOverrideStore::new()),
                registry: Arc::new(InMemorySystemRegistry::new()),
                audit: Arc::new(InMemoryAuditStore::new(settings.audit_max_entries)),
            })
        }
        StoreBackend::Postgres => {
            let url = settings
                .store
                .postgres_url
                .as_deref()
                .context("postgres backend requires store.postgres_url")?;
            info!("connecting to the postgres document store");
            let docs = Arc::new(
                PostgresDocumentStore::connect(url)
                    .await
                    .context("postgres connection failed")?,
            );
            let twins = RedbTwinStore::open(&settings.store.redb_path)
                .with_context(|| {
                    format!("failed to open {}", settings.store.redb_path.display())
                })?;
            let durable: Arc<dyn OverrideStore> = docs.clone();
            let cache: Arc<dyn OverrideStore> = Arc::new(InMemoryOverrideStore::new());
            Ok(Stores {
                twins: Arc::new(twins),
                overrides: Arc::new(WriteThroughOverrideStore::new(durable, cache)),
                registry: docs.clone(),
                audit: docs,
            })
        }
    }
}

/// Build the rule engine: compiled-in hardcoded rules plus the configured
/// expression rules. A broken rule file degrades to hardcoded-only operation.
async fn build_engine(settings: &Settings, audit: &Arc<dyn AuditStore>) -> SafetyRuleEngine {
    let mut engine =
        SafetyRuleEngine::new(EngineSettings { fail_open: settings.fail_open });
    engine.register(Arc::new(PumpFireInterlock::new()));
    engine.register(Arc::new(FirePumpInterlock::new()));
    engine.register(Arc::new(MaxFanSpeed::new(settings.max_fan_speed)));

    let Some(rules_file) = &settings.rules_file else {
        return engine;
    };
    let definitions = match load_rules(rules_file) {
        Ok(definitions) => definitions,
        Err(e) => {
            warn!(path = %rules_file.display(), error = %e, "rule file unusable; running hardcoded rules only");
            let entry = AuditEntry::new(
                CorrelationId::new(),
                DecisionType::FallbackActivated,
                "startup",
                Utc::now(),
            )
            .with_reason(format!("configured rule set unavailable: {e}"));
            if let Err(e) = audit.append(&entry).await {
                warn!(error = %e, "could not audit rule fallback");
            }
            return engine;
        }
    };

    for definition in definitions {
        let id = definition.id.clone();
        match ExpressionRule::compile(definition) {
            Ok(rule) => {
                engine.register(Arc::new(rule));
            }
            Err(e) => warn!(rule_id = %id, error = %e, "rule rejected at compile time"),
        }
    }
    engine
}

pub async fn serve(config: Option<PathBuf>) -> Result<()> {
    let settings = match config {
        Some(path) => load_settings(&path)?,
        None => Settings::default(),
    };
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install the metrics recorder")?;

    let stores = open_stores(&settings).await?;
    let health = HealthGate::new(&["twin-store", "document-store", "messaging"]);
    let sensors = SensorReadings::new();
    let engine = Arc::new(build_engine(&settings, &stores.audit).await);

    let (bus, bus_rx) = EventBus::new(settings.event_queue_capacity);
    let calculator =
        Arc::new(StateCalculator::new(stores.overrides.clone(), engine.clone()));
    let coordinator = Arc::new(ReconciliationCoordinator::new(
        stores.twins.clone(),
        stores.registry.clone(),
        calculator.clone(),
        bus.clone(),
        stores.audit.clone(),
        sensors.clone(),
    ));
    let pipeline = Arc::new(OverrideValidationPipeline::new(
        stores.twins.clone(),
        stores.registry.clone(),
        stores.overrides.clone(),
        engine,
        calculator,
        bus.clone(),
        stores.audit.clone(),
        sensors.clone(),
    ));
    let ingress = Arc::new(IntentIngress::new(
        stores.twins.clone(),
        stores.audit.clone(),
        bus.clone(),
        health.clone(),
    ));

    let (dashboard_tx, _) = broadcast::channel(64);
    let listeners: Vec<Arc<dyn EventListener>> = vec![
        Arc::new(RecalculationListener::new(coordinator.clone(), stores.registry.clone())),
        Arc::new(FeedbackProcessor::new(
            stores.twins.clone(),
            stores.audit.clone(),
            IdempotencyFilter::new(
                Arc::new(InMemoryMarkerStore::new()),
                Duration::from_secs(settings.marker_ttl_secs),
            ),
            sensors,
            bus.clone(),
            health.clone(),
        )),
        Arc::new(AuditListener::new(stores.audit.clone())),
        Arc::new(DashboardForwarder::new(dashboard_tx)),
        Arc::new(CommandDispatchListener::new(
            Arc::new(LogCommandPublisher),
            health.clone(),
        )),
    ];
    let dispatcher = EventDispatcher::new(bus_rx, listeners, settings.listener_concurrency);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    let reconciler = Reconciler::new(
        stores.twins.clone(),
        bus.clone(),
        health.clone(),
        Duration::from_secs(settings.reconcile_interval_secs),
    );
    let reconciler_task = tokio::spawn(reconciler.run(shutdown_rx.clone()));
    let sweeper = OverrideExpirationSweeper::new(
        stores.overrides.clone(),
        stores.audit.clone(),
        bus.clone(),
        Duration::from_secs(settings.sweep_interval_secs),
    );
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    let state = hearth_api::AppState {
        twins: stores.twins,
        registry: stores.registry,
        audit: stores.audit,
        pipeline,
        coordinator,
        ingress,
        health,
        metrics: Some(metrics_handle),
    };
    let app = hearth_api::build_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, "hearth listening");

    axum_serve(listener, app).await?;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = dispatcher_task.await;
    let _ = reconciler_task.await;
    let _ = sweeper_task.await;
    Ok(())
}

async fn axum_serve(listener: tokio::net::TcpListener, app: axum::Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")
}

// ── Client commands ───────────────────────────────────────────────────────────

fn parse_device(raw: &str) -> Result<DeviceId> {
    raw.parse::<DeviceId>().map_err(|e| anyhow::anyhow!(e))
}

/// Infer the wire type from the value literal: booleans drive relays, levels
/// 0-4 drive fans.
fn parse_value(raw: &str) -> Result<(&'static str, serde_json::Value)> {
    match raw {
        "true" => Ok(("RELAY", serde_json::json!(true))),
        "false" => Ok(("RELAY", serde_json::json!(false))),
        _ => match raw.parse::<u8>() {
            Ok(level) if level <= 4 => Ok(("FAN", serde_json::json!(level))),
            _ => bail!("value must be true, false, or a fan level 0-4"),
        },
    }
}

pub async fn status(remote: String) -> Result<()> {
    let response = reqwest::get(format!("{remote}/ready")).await?;
    let healthy = response.status().is_success();
    let body: serde_json::Value = response.json().await?;
    print!("{}", output::render_status(healthy, &body));
    Ok(())
}

pub async fn twin(remote: String, device: String) -> Result<()> {
    let device = parse_device(&device)?;
    let url = format!(
        "{remote}/devices/{}/{}/twin",
        device.controller(),
        device.component()
    );
    let response = reqwest::get(url).await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        bail!("device '{device}' has no twin");
    }
    let body: serde_json::Value = response.error_for_status()?.json().await?;
    print!("{}", output::render_twin(&device, &body));
    Ok(())
}

pub async fn intent(remote: String, device: String, value: String) -> Result<()> {
    let device = parse_device(&device)?;
    let (device_type, json_value) = parse_value(&value)?;
    let url = format!(
        "{remote}/devices/{}/{}/intent",
        device.controller(),
        device.component()
    );
    let response = reqwest::Client::new()
        .post(url)
        .json(&serde_json::json!({ "type": device_type, "value": json_value }))
        .send()
        .await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        bail!("intent rejected: {}", body["detail"].as_str().unwrap_or("unknown error"));
    }
    println!("intent accepted for {device}: {json_value}");
    if let Some(system) = body.get("system").filter(|s| !s.is_null()) {
        println!("  part of system '{}'", system["name"].as_str().unwrap_or("?"));
    }
    Ok(())
}

pub async fn override_set(
    remote: String,
    device: String,
    category: String,
    value: String,
    reason: String,
    ttl_seconds: Option<u64>,
) -> Result<()> {
    let device = parse_device(&device)?;
    let (device_type, json_value) = parse_value(&value)?;
    let url = format!(
        "{remote}/devices/{}/{}/override/{}",
        device.controller(),
        device.component(),
        category.to_uppercase()
    );
    let response = reqwest::Client::new()
        .put(url)
        .json(&serde_json::json!({
            "type": device_type,
            "value": json_value,
            "reason": reason,
            "ttlSeconds": ttl_seconds,
        }))
        .send()
        .await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        bail!("override rejected: {}", body["detail"].as_str().unwrap_or("unknown error"));
    }
    print!("{}", output::render_override_outcome(&body));
    Ok(())
}

pub async fn override_clear(remote: String, device: String, category: String) -> Result<()> {
    let device = parse_device(&device)?;
    let url = format!(
        "{remote}/devices/{}/{}/override/{}",
        device.controller(),
        device.component(),
        category.to_uppercase()
    );
    let response = reqwest::Client::new().delete(url).send().await?;
    match response.status() {
        reqwest::StatusCode::NO_CONTENT => {
            println!("override cleared for {device}");
            Ok(())
        }
        reqwest::StatusCode::NOT_FOUND => bail!("no such override"),
        status => bail!("unexpected response: {status}"),
    }
}
