use std::sync::Arc;

use hearth_engine::{
    HealthGate, IntentIngress, OverrideValidationPipeline, ReconciliationCoordinator,
};
use hearth_store::{AuditStore, SystemRegistry, TwinStore};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub twins: Arc<dyn TwinStore>,
    pub registry: Arc<dyn SystemRegistry>,
    pub audit: Arc<dyn AuditStore>,
    pub pipeline: Arc<OverrideValidationPipeline>,
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub ingress: Arc<IntentIngress>,
    pub health: HealthGate,
    /// Absent when the process runs without the Prometheus recorder (tests).
    pub metrics: Option<PrometheusHandle>,
}
