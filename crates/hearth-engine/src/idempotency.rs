use std::sync::Arc;
use std::time::Duration;

use hearth_domain::DeviceId;
use hearth_store::MarkerStore;
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::events::FeedbackFrame;

/// Default marker lifetime: long enough to swallow broker redeliveries,
/// short enough not to suppress genuine repeats.
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(300);

/// At-most-once admission for inbound feedback.
///
/// The key is the explicit broker message id when present, else the SHA-256
/// of `deviceId|timestamp|value`. On a marker-store error the filter opens
/// (admits the message): losing a dedup marker is cheaper than losing device
/// state.
#[derive(Clone)]
pub struct IdempotencyFilter {
    markers: Arc<dyn MarkerStore>,
    ttl: Duration,
}

impl IdempotencyFilter {
    pub fn new(markers: Arc<dyn MarkerStore>, ttl: Duration) -> Self {
        IdempotencyFilter { markers, ttl }
    }

    fn key_for(frame: &FeedbackFrame, device: &DeviceId) -> String {
        if let Some(message_id) = &frame.message_id {
            return format!("feedback:{message_id}");
        }
        let digest = Sha256::digest(
            format!("{}|{}|{}", device, frame.received_at.to_rfc3339(), frame.payload).as_bytes(),
        );
        format!("feedback:{digest:x}")
    }

    /// True when the message has not been seen inside the TTL window and
    /// should be processed.
    pub async fn admit(&self, frame: &FeedbackFrame, device: &DeviceId) -> bool {
        let key = Self::key_for(frame, device);
        match self.markers.set_if_absent(&key, self.ttl).await {
            Ok(fresh) => {
                if !fresh {
                    counter!("feedback.duplicates").increment(1);
                }
                fresh
            }
            Err(e) => {
                counter!("idempotency.marker_errors").increment(1);
                warn!(key = %key, error = %e, "marker store error; admitting message");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use hearth_store::{InMemoryMarkerStore, StoreError};

    fn frame(message_id: Option<&str>, payload: &str) -> FeedbackFrame {
        FeedbackFrame {
            topic: "ctl.digital_output.light.state".into(),
            payload: payload.into(),
            message_id: message_id.map(String::from),
            received_at: Utc::now(),
        }
    }

    fn device() -> DeviceId {
        DeviceId::new("ctl", "light").unwrap()
    }

    #[tokio::test]
    async fn explicit_message_id_deduplicates() {
        let filter =
            IdempotencyFilter::new(Arc::new(InMemoryMarkerStore::new()), DEFAULT_MARKER_TTL);
        let f = frame(Some("m-1"), "1");
        assert!(filter.admit(&f, &device()).await);
        assert!(!filter.admit(&f, &device()).await);
    }

    #[tokio::test]
    async fn hashed_key_deduplicates_identical_frames() {
        let filter =
            IdempotencyFilter::new(Arc::new(InMemoryMarkerStore::new()), DEFAULT_MARKER_TTL);
        let f = frame(None, "1");
        assert!(filter.admit(&f, &device()).await);
        assert!(!filter.admit(&f, &device()).await);

        // A frame with a different payload is a different message.
        let other = FeedbackFrame { payload: "0".into(), ..f };
        assert!(filter.admit(&other, &device()).await);
    }

    struct BrokenMarkerStore;

    #[async_trait]
    impl MarkerStore for BrokenMarkerStore {
        async fn set_if_absent(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Internal("down".into()))
        }
    }

    #[tokio::test]
    async fn marker_store_error_opens_the_filter() {
        let filter = IdempotencyFilter::new(Arc::new(BrokenMarkerStore), DEFAULT_MARKER_TTL);
        let f = frame(Some("m-1"), "1");
        assert!(filter.admit(&f, &device()).await);
        assert!(filter.admit(&f, &device()).await, "fail-open on store error");
    }
}
