use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hearth_domain::{
    AuditEntry, CorrelationId, DecisionType, DeviceId, OverrideTarget, ReportedDeviceState,
};
use hearth_store::{AuditStore, SystemRegistry, TwinStore};
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::bus::{EventBus, EventListener};
use crate::coordinator::ReconciliationCoordinator;
use crate::error::EngineError;
use crate::events::{CommandFrame, Event};
use crate::health::HealthGate;
use crate::idempotency::IdempotencyFilter;
use crate::sensors::SensorReadings;
use crate::wire::{self, InboundFrame};

/// Health-gate component name for the outbound messaging path.
pub const MESSAGING_COMPONENT: &str = "messaging";

/// Retry delays for inbound persistence and outbound dispatch (two retries,
/// exponential, 4 s cap).
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

// ── Recalculation ─────────────────────────────────────────────────────────────

/// Turns every state-affecting event into a coordinator run for the devices
/// it touches.
pub struct RecalculationListener {
    coordinator: Arc<ReconciliationCoordinator>,
    registry: Arc<dyn SystemRegistry>,
}

impl RecalculationListener {
    pub fn new(
        coordinator: Arc<ReconciliationCoordinator>,
        registry: Arc<dyn SystemRegistry>,
    ) -> Self {
        RecalculationListener { coordinator, registry }
    }

    async fn reconcile_target(
        &self,
        target: &OverrideTarget,
        correlation: CorrelationId,
    ) -> Result<(), EngineError> {
        match target {
            OverrideTarget::Device(device) => {
                self.coordinator.reconcile(device, correlation).await?;
            }
            OverrideTarget::System(system_id) => {
                let Some(system) = self.registry.find_by_id(*system_id).await? else {
                    warn!(system = %system_id, "override target system no longer exists");
                    return Ok(());
                };
                for device in &system.device_ids {
                    if let Err(e) = self.coordinator.reconcile(device, correlation).await {
                        warn!(device = %device, error = %e, "member reconcile failed");
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventListener for RecalculationListener {
    fn name(&self) -> &'static str {
        "recalculation"
    }

    fn wants(&self, event: &Event) -> bool {
        matches!(
            event,
            Event::UserIntentChanged { .. }
                | Event::ReportedStateChanged { .. }
                | Event::OverrideApplied { .. }
                | Event::OverrideCancelled { .. }
                | Event::OverrideExpired { .. }
        )
    }

    async fn handle(&self, event: Event) -> Result<(), EngineError> {
        match event {
            Event::UserIntentChanged { intent, correlation } => {
                self.coordinator.reconcile(&intent.id, correlation).await?;
                Ok(())
            }
            Event::ReportedStateChanged { reported, correlation } => {
                self.coordinator.reconcile(&reported.id, correlation).await?;
                Ok(())
            }
            Event::OverrideApplied { applied, correlation } => {
                self.reconcile_target(&applied.target, correlation).await
            }
            Event::OverrideCancelled { target, correlation, .. } => {
                self.reconcile_target(&target, correlation).await
            }
            Event::OverrideExpired { expired, correlation } => {
                self.reconcile_target(&expired.target, correlation).await
            }
            _ => Ok(()),
        }
    }
}

// ── Feedback processing ───────────────────────────────────────────────────────

/// Parses raw device frames, deduplicates them, persists reported state and
/// republishes the typed change event.
pub struct FeedbackProcessor {
    twins: Arc<dyn TwinStore>,
    audit: Arc<dyn AuditStore>,
    idempotency: IdempotencyFilter,
    sensors: SensorReadings,
    bus: EventBus,
    health: HealthGate,
}

impl FeedbackProcessor {
    pub fn new(
        twins: Arc<dyn TwinStore>,
        audit: Arc<dyn AuditStore>,
        idempotency: IdempotencyFilter,
        sensors: SensorReadings,
        bus: EventBus,
        health: HealthGate,
    ) -> Self {
        FeedbackProcessor { twins, audit, idempotency, sensors, bus, health }
    }

    async fn save_with_retry(&self, reported: &ReportedDeviceState) -> Result<(), EngineError> {
        let mut attempt = 0;
        loop {
            match self.twins.save_reported(reported).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RETRY_DELAYS.len() => {
                    warn!(device = %reported.id, error = %e, attempt, "reported write failed; retrying");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Audit convergence transitions observable from this report.
    async fn audit_convergence(
        &self,
        id: &DeviceId,
        correlation: CorrelationId,
    ) -> Result<(), EngineError> {
        let Some(snapshot) = self.twins.find_snapshot(id).await? else {
            return Ok(());
        };
        let Some(desired) = &snapshot.desired else {
            return Ok(());
        };
        let reported_value = snapshot
            .reported
            .as_ref()
            .filter(|r| r.known)
            .and_then(|r| r.value);

        let decision = if snapshot.is_converged() {
            DecisionType::DeviceConverged
        } else if reported_value.is_some() {
            DecisionType::DeviceDiverged
        } else {
            return Ok(());
        };
        self.audit
            .append(
                &AuditEntry::new(correlation, decision, "feedback", Utc::now())
                    .for_device(id.clone())
                    .with_values(reported_value, Some(desired.value)),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventListener for FeedbackProcessor {
    fn name(&self) -> &'static str {
        "feedback-processor"
    }

    fn wants(&self, event: &Event) -> bool {
        matches!(event, Event::ActuatorFeedbackReceived { .. })
    }

    async fn handle(&self, event: Event) -> Result<(), EngineError> {
        let Event::ActuatorFeedbackReceived { frame, correlation } = event else {
            return Ok(());
        };
        if !self.health.healthy() {
            return Err(EngineError::InfrastructureDown(
                "feedback processing suspended while infrastructure is unhealthy".into(),
            ));
        }

        let inbound = match wire::parse_inbound(&frame.topic, &frame.payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                counter!("feedback.invalid").increment(1);
                warn!(topic = %frame.topic, payload = %frame.payload, error = %e, "unparseable frame");
                return Ok(());
            }
        };

        match inbound {
            InboundFrame::Temperature { topic_key, celsius } => {
                counter!("telemetry.temperature").increment(1);
                self.sensors.record(topic_key, celsius);
                Ok(())
            }
            InboundFrame::ActuatorFeedback { id, device_type, value } => {
                if !self.idempotency.admit(&frame, &id).await {
                    debug!(device = %id, "duplicate feedback dropped");
                    return Ok(());
                }

                let reported =
                    ReportedDeviceState::known(id.clone(), device_type, value, frame.received_at)?;
                if let Err(e) = self.save_with_retry(&reported).await {
                    counter!("feedback.dead_lettered").increment(1);
                    warn!(device = %id, error = %e, "feedback dead-lettered after retries");
                    return Ok(());
                }

                self.audit_convergence(&id, correlation).await?;
                self.bus.publish(Event::ReportedStateChanged { reported, correlation }).await
            }
        }
    }
}

// ── Audit trail ───────────────────────────────────────────────────────────────

/// Appends exactly one `DESIRED_CALCULATED` entry per announced desired
/// state.
pub struct AuditListener {
    audit: Arc<dyn AuditStore>,
}

impl AuditListener {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        AuditListener { audit }
    }
}

#[async_trait]
impl EventListener for AuditListener {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn wants(&self, event: &Event) -> bool {
        matches!(event, Event::DesiredStateCalculated { .. })
    }

    async fn handle(&self, event: Event) -> Result<(), EngineError> {
        let Event::DesiredStateCalculated { desired, previous, reason, correlation } = event
        else {
            return Ok(());
        };
        self.audit
            .append(
                &AuditEntry::new(
                    correlation,
                    DecisionType::DesiredCalculated,
                    "coordinator",
                    Utc::now(),
                )
                .for_device(desired.id.clone())
                .with_values(previous, Some(desired.value))
                .with_reason(reason),
            )
            .await?;
        Ok(())
    }
}

// ── Dashboard push ────────────────────────────────────────────────────────────

/// Fans state changes out to dashboard subscribers. The push transport hangs
/// off the broadcast receiver side; with no subscribers the send is a no-op.
pub struct DashboardForwarder {
    tx: broadcast::Sender<Event>,
}

impl DashboardForwarder {
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        DashboardForwarder { tx }
    }
}

#[async_trait]
impl EventListener for DashboardForwarder {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn wants(&self, event: &Event) -> bool {
        matches!(
            event,
            Event::DesiredStateCalculated { .. } | Event::ReportedStateChanged { .. }
        )
    }

    async fn handle(&self, event: Event) -> Result<(), EngineError> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

// ── Command dispatch ──────────────────────────────────────────────────────────

/// Outbound seam to the wire adapter. Implementations deliver a command frame
/// to the device transport.
#[async_trait]
pub trait CommandPublisher: Send + Sync + 'static {
    async fn publish(&self, frame: &CommandFrame) -> Result<(), EngineError>;
}

/// Publisher that only logs. Stands in for the wire adapter in local mode.
#[derive(Debug, Default, Clone)]
pub struct LogCommandPublisher;

#[async_trait]
impl CommandPublisher for LogCommandPublisher {
    async fn publish(&self, frame: &CommandFrame) -> Result<(), EngineError> {
        tracing::info!(topic = %frame.topic, payload = %frame.payload, "command emitted");
        Ok(())
    }
}

/// Translates command events to wire frames and dispatches them, gated on
/// infrastructure health.
pub struct CommandDispatchListener {
    publisher: Arc<dyn CommandPublisher>,
    health: HealthGate,
}

impl CommandDispatchListener {
    pub fn new(publisher: Arc<dyn CommandPublisher>, health: HealthGate) -> Self {
        CommandDispatchListener { publisher, health }
    }
}

#[async_trait]
impl EventListener for CommandDispatchListener {
    fn name(&self) -> &'static str {
        "command-dispatch"
    }

    fn wants(&self, event: &Event) -> bool {
        matches!(event, Event::DeviceCommand { .. })
    }

    async fn handle(&self, event: Event) -> Result<(), EngineError> {
        let Event::DeviceCommand { id, device_type, value, .. } = event else {
            return Ok(());
        };
        if !self.health.healthy() {
            counter!("commands.suppressed").increment(1);
            return Err(EngineError::InfrastructureDown(
                "command path suppressed while infrastructure is unhealthy".into(),
            ));
        }

        let frame = wire::command_frame(&id, device_type, &value)?;
        let mut attempt = 0;
        loop {
            match self.publisher.publish(&frame).await {
                Ok(()) => {
                    counter!("commands.dispatched").increment(1);
                    return Ok(());
                }
                Err(e) if attempt < RETRY_DELAYS.len() => {
                    warn!(topic = %frame.topic, error = %e, attempt, "command publish failed; retrying");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
                Err(e) => {
                    counter!("commands.failed").increment(1);
                    self.health.report_unhealthy(MESSAGING_COMPONENT, e.to_string());
                    return Err(EngineError::Dispatch(e.to_string()));
                }
            }
        }
    }
}
