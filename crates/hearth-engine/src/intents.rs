use std::sync::Arc;

use chrono::Utc;
use hearth_domain::{AuditEntry, CorrelationId, DecisionType, UserIntent};
use hearth_store::{AuditStore, TwinStore};
use tracing::debug;

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::events::Event;
use crate::health::HealthGate;

/// Front door for user intents: persist, audit the receipt, announce.
///
/// The actual recalculation happens downstream when the bus delivers
/// `UserIntentChanged` to the recalculation listener.
pub struct IntentIngress {
    twins: Arc<dyn TwinStore>,
    audit: Arc<dyn AuditStore>,
    bus: EventBus,
    health: HealthGate,
}

impl IntentIngress {
    pub fn new(
        twins: Arc<dyn TwinStore>,
        audit: Arc<dyn AuditStore>,
        bus: EventBus,
        health: HealthGate,
    ) -> Self {
        IntentIngress { twins, audit, bus, health }
    }

    /// Accept an intent. Rejected with `InfrastructureDown` while any
    /// dependency is unhealthy (fail-stop; the caller may retry later).
    pub async fn submit(
        &self,
        intent: UserIntent,
        correlation: CorrelationId,
    ) -> Result<(), EngineError> {
        if !self.health.healthy() {
            return Err(EngineError::InfrastructureDown(
                "intent ingress suspended while infrastructure is unhealthy".into(),
            ));
        }

        self.twins.save_intent(&intent).await?;
        self.audit
            .append(
                &AuditEntry::new(correlation, DecisionType::IntentReceived, "api", Utc::now())
                    .for_device(intent.id.clone())
                    .with_values(None, Some(intent.value))
                    .with_reason("user intent received"),
            )
            .await?;
        debug!(device = %intent.id, value = %intent.value, "intent accepted");
        self.bus.publish(Event::UserIntentChanged { intent, correlation }).await
    }
}
