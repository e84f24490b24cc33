pub mod bus;
pub mod calculator;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod health;
pub mod idempotency;
pub mod intents;
pub mod listeners;
pub mod pipeline;
pub mod reconciler;
pub mod sensors;
pub mod sweeper;
pub mod wire;

pub use bus::{EventBus, EventDispatcher, EventListener};
pub use calculator::{CalculationResult, EffectiveOverride, StateCalculator};
pub use coordinator::{ReconciliationCoordinator, ReconciliationResult};
pub use error::EngineError;
pub use events::{CommandFrame, Event, FeedbackFrame};
pub use health::{ComponentHealth, HealthGate};
pub use idempotency::IdempotencyFilter;
pub use intents::IntentIngress;
pub use listeners::{
    AuditListener, CommandDispatchListener, CommandPublisher, DashboardForwarder,
    FeedbackProcessor, LogCommandPublisher, RecalculationListener,
};
pub use pipeline::{OverrideRequest, OverrideValidationPipeline, OverrideValidationResult};
pub use reconciler::{CycleStats, Reconciler};
pub use sensors::SensorReadings;
pub use sweeper::OverrideExpirationSweeper;
