use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use hearth_domain::{
    CorrelationId, DecisionType, DeviceId, DeviceType, DeviceValue, FunctionalSystem,
    OverrideCategory, OverrideTarget, SystemType, UserIntent,
};
use hearth_engine::{OverrideRequest, OverrideValidationResult};
use hearth_store::{AuditStore as _, SystemRegistry as _, TimeRange, TwinStore as _};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::problem::Problem;
use crate::state::AppState;

fn parse_device(controller: &str, component: &str) -> Result<DeviceId, Problem> {
    DeviceId::new(controller, component).map_err(|e| Problem::validation(e.to_string()))
}

fn parse_category(raw: &str) -> Result<OverrideCategory, Problem> {
    OverrideCategory::parse_str(raw).map_err(|e| Problem::validation(e.to_string()))
}

/// Interpret a raw JSON value as a device value of the requested type.
fn device_value_from_json(
    device_type: DeviceType,
    value: &Value,
) -> Result<DeviceValue, Problem> {
    match (device_type, value) {
        (DeviceType::Relay, Value::Bool(on)) => Ok(DeviceValue::relay(*on)),
        (DeviceType::Fan, Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .and_then(|v| DeviceValue::fan(v).ok())
            .ok_or_else(|| Problem::validation(format!("fan value {n} out of range 0..=4"))),
        (DeviceType::TemperatureSensor, _) => {
            Err(Problem::validation("temperature sensors cannot be driven".to_string()))
        }
        (t, other) => {
            Err(Problem::validation(format!("value {other} is not valid for type {t}")))
        }
    }
}

// ── Health & metrics ──────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let statuses = state.health.statuses();
    let status = if state.health.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "healthy": state.health.healthy(), "components": statuses })))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── Intents & twins ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IntentBody {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub value: Value,
}

pub async fn post_intent(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((controller, component)): Path<(String, String)>,
    Json(body): Json<IntentBody>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    if !body.device_type.is_output() {
        return Err(Problem::validation(format!(
            "{} devices do not accept intents",
            body.device_type
        ))
        .with_correlation(correlation));
    }
    let value = device_value_from_json(body.device_type, &body.value)?;
    let intent = UserIntent::new(device.clone(), body.device_type, value, Utc::now())
        .map_err(|e| Problem::validation(e.to_string()).with_correlation(correlation))?;

    state
        .ingress
        .submit(intent.clone(), correlation)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;

    let system = state
        .registry
        .find_by_device(&device)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(Json(json!({
        "intent": intent,
        "system": system.map(|s| json!({ "id": s.id, "name": s.name, "type": s.system_type })),
        "correlationId": correlation,
    })))
}

pub async fn get_twin(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((controller, component)): Path<(String, String)>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    let snapshot = state
        .twins
        .find_snapshot(&device)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?
        .ok_or_else(|| {
            Problem::not_found(format!("device '{device}' has no twin"))
                .with_correlation(correlation)
        })?;
    let converged = snapshot.is_converged();
    Ok(Json(json!({ "twin": snapshot, "converged": converged })))
}

pub async fn get_device_overrides(
    State(state): State<AppState>,
    Path((controller, component)): Path<(String, String)>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    let active = state.pipeline.list_active(&OverrideTarget::Device(device)).await?;
    Ok(Json(json!(active)))
}

// ── Overrides ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideBody {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub value: Value,
    pub reason: String,
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn override_response(result: OverrideValidationResult) -> Json<Value> {
    Json(match result {
        OverrideValidationResult::Applied { applied, warnings } => json!({
            "outcome": "APPLIED",
            "override": applied,
            "warnings": warnings,
        }),
        OverrideValidationResult::Modified { applied, original, modified, modifying_rules } => {
            json!({
                "outcome": "MODIFIED",
                "override": applied,
                "originalValue": original,
                "modifiedValue": modified,
                "modifyingRules": modifying_rules,
            })
        }
        OverrideValidationResult::Blocked { reason, blocking_rules } => json!({
            "outcome": "BLOCKED",
            "reason": reason,
            "blockingRules": blocking_rules,
        }),
    })
}

async fn apply_override(
    state: &AppState,
    target: OverrideTarget,
    category: OverrideCategory,
    body: OverrideBody,
    correlation: CorrelationId,
) -> Result<Json<Value>, Problem> {
    let value = device_value_from_json(body.device_type, &body.value)?;
    let request = OverrideRequest {
        target,
        category,
        value,
        reason: body.reason,
        ttl_seconds: body.ttl_seconds,
        created_by: body.created_by.unwrap_or_else(|| "api".to_string()),
    };
    let result = state
        .pipeline
        .apply(request, correlation)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(override_response(result))
}

pub async fn put_device_override(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((controller, component, category)): Path<(String, String, String)>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    let category = parse_category(&category)?;
    apply_override(&state, OverrideTarget::Device(device), category, body, correlation).await
}

pub async fn delete_device_override(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((controller, component, category)): Path<(String, String, String)>,
) -> Result<StatusCode, Problem> {
    let device = parse_device(&controller, &component)?;
    let category = parse_category(&category)?;
    let deleted = state
        .pipeline
        .cancel(OverrideTarget::Device(device), category, correlation)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Problem::not_found("no such override").with_correlation(correlation))
    }
}

pub async fn put_system_override(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((id, category)): Path<(Uuid, String)>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<Value>, Problem> {
    let category = parse_category(&category)?;
    apply_override(&state, OverrideTarget::System(id), category, body, correlation).await
}

pub async fn delete_system_override(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((id, category)): Path<(Uuid, String)>,
) -> Result<StatusCode, Problem> {
    let category = parse_category(&category)?;
    let deleted = state
        .pipeline
        .cancel(OverrideTarget::System(id), category, correlation)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Problem::not_found("no such override").with_correlation(correlation))
    }
}

pub async fn get_effective_override(
    State(state): State<AppState>,
    Path((controller, component)): Path<(String, String)>,
    Query(query): Query<EffectiveQuery>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    let effective =
        state.pipeline.resolve_effective_for_device(&device, query.system_id).await?;
    Ok(Json(match effective {
        Some(eff) => json!({
            "override": eff.ovr,
            "isFromSystem": eff.is_from_system,
        }),
        None => json!(null),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveQuery {
    pub system_id: Option<Uuid>,
}

// ── Systems ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSystemBody {
    #[serde(rename = "type")]
    pub system_type: SystemType,
    pub name: String,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub device_ids: HashSet<DeviceId>,
    #[serde(default)]
    pub fail_safe_defaults: HashMap<DeviceId, DeviceValue>,
}

pub async fn create_system(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(body): Json<CreateSystemBody>,
) -> Result<(StatusCode, Json<Value>), Problem> {
    for device in body.fail_safe_defaults.keys() {
        if !body.device_ids.contains(device) {
            return Err(Problem::validation(format!(
                "fail-safe default for '{device}' which is not a member"
            ))
            .with_correlation(correlation));
        }
    }

    let now = Utc::now();
    let mut system = FunctionalSystem::new(body.system_type, body.name, now);
    system.configuration = body.configuration;
    system.device_ids = body.device_ids;
    system.fail_safe_defaults = body.fail_safe_defaults;

    state
        .registry
        .save(&system)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok((StatusCode::CREATED, Json(json!(system))))
}

pub async fn list_systems(State(state): State<AppState>) -> Result<Json<Value>, Problem> {
    let systems = state.registry.list().await?;
    Ok(Json(json!(systems)))
}

pub async fn get_system(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, Problem> {
    let system = state
        .registry
        .find_by_id(id)
        .await?
        .ok_or_else(|| Problem::not_found(format!("system '{id}' not found")))?;
    Ok(Json(json!(system)))
}

pub async fn patch_system_configuration(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(patch): Json<HashMap<String, Value>>,
) -> Result<Json<Value>, Problem> {
    let mut system = state
        .registry
        .find_by_id(id)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?
        .ok_or_else(|| {
            Problem::not_found(format!("system '{id}' not found")).with_correlation(correlation)
        })?;

    for (key, value) in patch {
        if value.is_null() {
            system.configuration.remove(&key);
        } else {
            system.configuration.insert(key, value);
        }
    }
    system.touch(Utc::now());
    state
        .registry
        .save(&system)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(Json(json!(system)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceBody {
    pub device_id: DeviceId,
}

pub async fn add_system_device(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(body): Json<AddDeviceBody>,
) -> Result<Json<Value>, Problem> {
    let mut system = state
        .registry
        .find_by_id(id)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?
        .ok_or_else(|| {
            Problem::not_found(format!("system '{id}' not found")).with_correlation(correlation)
        })?;
    system.add_device(body.device_id, Utc::now());
    state
        .registry
        .save(&system)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(Json(json!(system)))
}

pub async fn remove_system_device(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((id, controller, component)): Path<(Uuid, String, String)>,
) -> Result<Json<Value>, Problem> {
    let device = parse_device(&controller, &component)?;
    let mut system = state
        .registry
        .find_by_id(id)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?
        .ok_or_else(|| {
            Problem::not_found(format!("system '{id}' not found")).with_correlation(correlation)
        })?;
    if !system.remove_device(&device, Utc::now()) {
        return Err(Problem::not_found(format!("device '{device}' is not a member"))
            .with_correlation(correlation));
    }
    state
        .registry
        .save(&system)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(Json(json!(system)))
}

pub async fn post_fail_safe(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, Problem> {
    let applied = state
        .coordinator
        .apply_fail_safe(id, correlation)
        .await
        .map_err(|e| Problem::from(e).with_correlation(correlation))?;
    Ok(Json(json!({ "applied": applied, "correlationId": correlation })))
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub correlation_id: Option<CorrelationId>,
    pub device_id: Option<String>,
    pub system_id: Option<Uuid>,
    pub decision_type: Option<DecisionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, Problem> {
    let range = TimeRange { from: query.from, to: query.to };
    let entries = if let Some(correlation) = query.correlation_id {
        state.audit.find_by_correlation(&correlation).await?
    } else if let Some(raw) = query.device_id {
        let device: DeviceId =
            raw.parse().map_err(|e: hearth_domain::DomainError| Problem::validation(e.to_string()))?;
        state.audit.find_by_device(&device, range).await?
    } else if let Some(system) = query.system_id {
        state.audit.find_by_system(system, range).await?
    } else if let Some(decision) = query.decision_type {
        state.audit.find_by_decision(decision, range).await?
    } else {
        return Err(Problem::validation(
            "one of correlationId, deviceId, systemId or decisionType is required",
        ));
    };
    Ok(Json(json!(entries)))
}
