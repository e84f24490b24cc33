use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hearth_domain::{AuditEntry, CorrelationId, DecisionType, OverrideTarget};
use hearth_store::{AuditStore, OverrideStore};
use metrics::counter;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::events::Event;

/// Physically removes expired overrides.
///
/// Expiration is already logical (expired entries are filtered at read time);
/// this task deletes them, appends the audit trail and publishes
/// `OverrideExpired`, which the recalculation listener turns into a reconcile
/// of the affected target.
pub struct OverrideExpirationSweeper {
    overrides: Arc<dyn OverrideStore>,
    audit: Arc<dyn AuditStore>,
    bus: EventBus,
    interval: Duration,
}

impl OverrideExpirationSweeper {
    pub fn new(
        overrides: Arc<dyn OverrideStore>,
        audit: Arc<dyn AuditStore>,
        bus: EventBus,
        interval: Duration,
    ) -> Self {
        OverrideExpirationSweeper { overrides, audit, bus, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One sweep pass. Returns how many overrides were removed.
    pub async fn sweep(&self) -> u64 {
        let now = Utc::now();
        let expired = match self.overrides.find_expired(now).await {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "expired-override query failed");
                return 0;
            }
        };

        let mut removed = 0;
        for ovr in expired {
            let correlation = CorrelationId::new();
            match self
                .overrides
                .delete_by_target_and_category(&ovr.target, ovr.category)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue, // already gone; nothing to announce
                Err(e) => {
                    warn!(override_id = %ovr.id, error = %e, "expired-override delete failed");
                    continue;
                }
            }
            removed += 1;
            info!(override_id = %ovr.id, "override expired");

            let mut entry = AuditEntry::new(
                correlation,
                DecisionType::OverrideExpired,
                "expiration-sweeper",
                Utc::now(),
            )
            .with_values(Some(ovr.value), None)
            .with_reason(format!("override expired at {:?}", ovr.expires_at));
            match &ovr.target {
                OverrideTarget::Device(device) => entry = entry.for_device(device.clone()),
                OverrideTarget::System(system) => entry = entry.for_system(*system),
            }
            if let Err(e) = self.audit.append(&entry).await {
                warn!(override_id = %ovr.id, error = %e, "audit append failed");
            }

            if let Err(e) =
                self.bus.publish(Event::OverrideExpired { expired: ovr, correlation }).await
            {
                warn!(error = %e, "override-expired publish failed");
            }
        }

        counter!("overrides.expired").increment(removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::{DeviceId, DeviceValue, Override, OverrideCategory};
    use hearth_store::{
        AuditStore as _, InMemoryAuditStore, InMemoryOverrideStore, OverrideStore as _, TimeRange,
    };

    #[tokio::test]
    async fn sweep_deletes_audits_and_publishes() {
        let overrides = Arc::new(InMemoryOverrideStore::new());
        let audit = Arc::new(InMemoryAuditStore::default());
        let (bus, mut rx) = EventBus::new(16);
        let sweeper = OverrideExpirationSweeper::new(
            overrides.clone(),
            audit.clone(),
            bus,
            Duration::from_secs(60),
        );

        let now = Utc::now();
        let target = OverrideTarget::Device(DeviceId::new("esp", "pump").unwrap());
        let stale = Override::new(
            target.clone(),
            OverrideCategory::Maintenance,
            DeviceValue::relay(true),
            "service",
            "op",
            now - chrono::Duration::hours(2),
        )
        .with_expiry(now - chrono::Duration::hours(1));
        let fresh = Override::new(
            target.clone(),
            OverrideCategory::Manual,
            DeviceValue::relay(false),
            "keep",
            "op",
            now,
        );
        overrides.save(&stale).await.unwrap();
        overrides.save(&fresh).await.unwrap();

        assert_eq!(sweeper.sweep().await, 1);

        // Only the expired entry is gone.
        assert!(overrides
            .find_by_target_and_category(&target, OverrideCategory::Maintenance)
            .await
            .unwrap()
            .is_none());
        assert!(overrides
            .find_by_target_and_category(&target, OverrideCategory::Manual)
            .await
            .unwrap()
            .is_some());

        let entries = audit
            .find_by_decision(hearth_domain::DecisionType::OverrideExpired, TimeRange::all())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        match rx.recv().await.unwrap() {
            Event::OverrideExpired { expired, .. } => {
                assert_eq!(expired.category, OverrideCategory::Maintenance);
            }
            other => panic!("expected expiry event, got {other:?}"),
        }

        // Second sweep is a no-op.
        assert_eq!(sweeper.sweep().await, 0);
    }
}
