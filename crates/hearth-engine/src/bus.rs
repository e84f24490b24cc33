use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::Event;

/// How long in-flight listeners get to finish after shutdown is signalled.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// A bus subscriber. Listeners run on the dispatcher's bounded worker pool;
/// they may suspend on I/O but must never block the thread.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Cheap filter deciding whether [`EventListener::handle`] is invoked.
    fn wants(&self, event: &Event) -> bool;

    async fn handle(&self, event: Event) -> Result<(), EngineError>;
}

/// Publisher handle for the in-process event bus.
///
/// The queue is bounded; when it is full, `publish` suspends the caller until
/// space frees up (caller-runs backpressure). Clone freely.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given queue capacity. The returned receiver is
    /// handed to [`EventDispatcher::new`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventBus { tx }, rx)
    }

    pub async fn publish(&self, event: Event) -> Result<(), EngineError> {
        debug!(kind = event.kind(), correlation = %event.correlation(), "publish");
        counter!("bus.published").increment(1);
        self.tx.send(event).await.map_err(|_| EngineError::BusClosed)
    }
}

/// Drains the event queue and fans each event out to the listeners that want
/// it. Listener invocations run concurrently under a semaphore so a slow
/// listener cannot starve the rest; a failing listener is logged and counted,
/// never tearing down the pool.
pub struct EventDispatcher {
    rx: mpsc::Receiver<Event>,
    listeners: Vec<Arc<dyn EventListener>>,
    limiter: Arc<Semaphore>,
}

impl EventDispatcher {
    pub fn new(
        rx: mpsc::Receiver<Event>,
        listeners: Vec<Arc<dyn EventListener>>,
        max_concurrency: usize,
    ) -> Self {
        EventDispatcher { rx, listeners, limiter: Arc::new(Semaphore::new(max_concurrency)) }
    }

    /// Run until shutdown is signalled or every publisher is dropped.
    /// On shutdown no further events are accepted; in-flight listeners get
    /// [`DRAIN_GRACE`] to complete.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => self.dispatch(event, &mut tasks),
                        None => break,
                    }
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        self.rx.close();
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            warn!("listener drain exceeded grace period; aborting stragglers");
            tasks.abort_all();
        }
    }

    fn dispatch(&self, event: Event, tasks: &mut JoinSet<()>) {
        for listener in &self.listeners {
            if !listener.wants(&event) {
                continue;
            }
            let listener = listener.clone();
            let event = event.clone();
            let limiter = self.limiter.clone();
            tasks.spawn(async move {
                // Holding the permit for the whole invocation bounds pool width.
                let Ok(_permit) = limiter.acquire().await else {
                    return;
                };
                if let Err(e) = listener.handle(event.clone()).await {
                    counter!("listeners.failed", "listener" => listener.name()).increment(1);
                    warn!(
                        listener = listener.name(),
                        kind = event.kind(),
                        correlation = %event.correlation(),
                        error = %e,
                        "listener failed"
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_domain::{CorrelationId, DeviceId, DeviceType, DeviceValue, UserIntent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        seen: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventListener for CountingListener {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn wants(&self, event: &Event) -> bool {
            matches!(event, Event::UserIntentChanged { .. })
        }

        async fn handle(&self, _event: Event) -> Result<(), EngineError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::Validation("boom".into()));
            }
            Ok(())
        }
    }

    fn intent_event() -> Event {
        let id = DeviceId::new("ctl", "light").unwrap();
        Event::UserIntentChanged {
            intent: UserIntent::new(id, DeviceType::Relay, DeviceValue::relay(true), Utc::now())
                .unwrap(),
            correlation: CorrelationId::new(),
        }
    }

    #[tokio::test]
    async fn listeners_receive_matching_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (bus, rx) = EventBus::new(16);
        let dispatcher = EventDispatcher::new(
            rx,
            vec![Arc::new(CountingListener { seen: seen.clone(), fail: false })],
            4,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        bus.publish(intent_event()).await.unwrap();
        bus.publish(intent_event()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_dispatch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (bus, rx) = EventBus::new(16);
        let dispatcher = EventDispatcher::new(
            rx,
            vec![Arc::new(CountingListener { seen: seen.clone(), fail: true })],
            4,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        bus.publish(intent_event()).await.unwrap();
        bus.publish(intent_event()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2, "second event still delivered");
    }

    #[tokio::test]
    async fn publish_fails_after_dispatcher_drops() {
        let (bus, rx) = EventBus::new(4);
        drop(rx);
        assert!(matches!(bus.publish(intent_event()).await, Err(EngineError::BusClosed)));
    }
}
