use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_domain::CorrelationId;
use hearth_store::TwinStore;
use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::events::Event;
use crate::health::HealthGate;

/// Health-gate component name reported by the reconciler.
pub const TWIN_STORE_COMPONENT: &str = "twin-store";

/// Periodic divergence scan.
///
/// Every tick walks the active-output index, skips converged devices, and
/// emits one command event per divergent device. Per-device failures are
/// counted and never abort the cycle; an index-read failure is a cycle
/// failure and flips the twin-store component unhealthy.
pub struct Reconciler {
    twins: Arc<dyn TwinStore>,
    bus: EventBus,
    health: HealthGate,
    interval: Duration,
}

/// Per-cycle counters, also emitted as metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub reconciled: u64,
    pub skipped: u64,
    pub failed: u64,
    pub no_snapshot: u64,
}

impl Reconciler {
    pub fn new(
        twins: Arc<dyn TwinStore>,
        bus: EventBus,
        health: HealthGate,
        interval: Duration,
    ) -> Self {
        Reconciler { twins, bus, health, interval }
    }

    /// Run until shutdown. Ticks never overlap: the next tick waits for the
    /// previous cycle to finish.
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
                    self.cycle().await;
                }
            }
        }
    }

    /// One reconciliation pass. Public so tests and operators can trigger a
    /// cycle outside the timer.
    pub async fn cycle(&self) -> CycleStats {
        let started = Instant::now();
        let mut stats = CycleStats::default();

        if !self.health.healthy() {
            counter!("reconciler.skipped_cycles").increment(1);
            warn!("infrastructure unhealthy; skipping reconcile cycle");
            return stats;
        }

        let devices = match self.twins.active_output_devices().await {
            Ok(devices) => {
                self.health.report_healthy(TWIN_STORE_COMPONENT);
                devices
            }
            Err(e) => {
                counter!("reconciler.failed_cycles").increment(1);
                warn!(error = %e, "active-output index read failed; aborting cycle");
                self.health.report_unhealthy(TWIN_STORE_COMPONENT, e.to_string());
                return stats;
            }
        };

        for device in devices {
            match self.reconcile_one(&device.id).await {
                Ok(Outcome::Commanded) => stats.reconciled += 1,
                Ok(Outcome::Converged) => stats.skipped += 1,
                Ok(Outcome::NoSnapshot) => stats.no_snapshot += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(device = %device.id, error = %e, "per-device reconcile failed");
                }
            }
        }

        counter!("devices.reconciled").increment(stats.reconciled);
        counter!("devices.skipped").increment(stats.skipped);
        counter!("devices.failed").increment(stats.failed);
        counter!("devices.no_snapshot").increment(stats.no_snapshot);
        histogram!("cycle.duration").record(started.elapsed().as_secs_f64());
        debug!(
            reconciled = stats.reconciled,
            skipped = stats.skipped,
            failed = stats.failed,
            no_snapshot = stats.no_snapshot,
            "reconcile cycle complete"
        );
        stats
    }

    async fn reconcile_one(&self, id: &hearth_domain::DeviceId) -> Result<Outcome, EngineError> {
        let Some(snapshot) = self.twins.find_snapshot(id).await? else {
            // The index pointed at a device with no record: data inconsistency.
            return Ok(Outcome::NoSnapshot);
        };
        if snapshot.is_converged() {
            return Ok(Outcome::Converged);
        }
        let Some(desired) = snapshot.desired else {
            return Ok(Outcome::NoSnapshot);
        };
        self.bus
            .publish(Event::DeviceCommand {
                id: desired.id.clone(),
                device_type: desired.device_type,
                value: desired.value,
                correlation: CorrelationId::new(),
            })
            .await?;
        Ok(Outcome::Commanded)
    }
}

enum Outcome {
    Commanded,
    Converged,
    NoSnapshot,
}
