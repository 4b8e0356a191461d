//! Render sink that publishes timer displays as host events.

use crate::host::contract::{EventEnvelope, events};
use crate::host::rate_limit::{RateLimitError, ScopedRateLimiter};
use crate::timer::render::{ArtifactRef, RenderError, RenderFrame, RenderSink};
use crate::timer::{ScopeId, TimerId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Emits `timer.opened`, `timer.render` and `timer.removed` events.
///
/// Only frame updates are throttled; opening and removing a display always
/// go through. Handles are valid for this sink instance only.
#[derive(Debug)]
pub struct EventRenderSink {
    epoch: Uuid,
    event_tx: broadcast::Sender<EventEnvelope>,
    limiter: ScopedRateLimiter,
    next_handle: AtomicU64,
    live: Mutex<HashSet<u64>>,
}

impl EventRenderSink {
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>, max_messages_per_minute: u32) -> Self {
        Self::with_limiter(event_tx, ScopedRateLimiter::new(max_messages_per_minute))
    }

    #[must_use]
    pub fn with_limiter(
        event_tx: broadcast::Sender<EventEnvelope>,
        limiter: ScopedRateLimiter,
    ) -> Self {
        Self {
            epoch: Uuid::new_v4(),
            event_tx,
            limiter,
            next_handle: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        let envelope = EventEnvelope::new(Uuid::new_v4().to_string(), event, payload);
        // No subscribers is fine; the display simply is not watched.
        let _ = self.event_tx.send(envelope);
    }

    fn check_live(&self, artifact: &ArtifactRef) -> Result<(), RenderError> {
        if artifact.epoch != self.epoch {
            return Err(RenderError::Permanent(format!(
                "display {} was issued by another process",
                artifact.handle
            )));
        }
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.contains(&artifact.handle) {
            Ok(())
        } else {
            Err(RenderError::Permanent(format!(
                "display {} no longer exists",
                artifact.handle
            )))
        }
    }
}

#[async_trait]
impl RenderSink for EventRenderSink {
    async fn open(
        &self,
        scope: ScopeId,
        text: &str,
        timer_id: TimerId,
    ) -> Result<ArtifactRef, RenderError> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle);

        self.emit(
            events::TIMER_OPENED,
            serde_json::json!({
                "handle": handle,
                "timer_id": timer_id,
                "scope": scope,
                "text": text,
            }),
        );
        Ok(ArtifactRef {
            scope,
            handle,
            epoch: self.epoch,
        })
    }

    async fn render(&self, artifact: &ArtifactRef, frame: &RenderFrame) -> Result<(), RenderError> {
        self.check_live(artifact)?;
        self.limiter
            .try_send(artifact.scope)
            .map_err(|RateLimitError::Exceeded { retry_after }| RenderError::Transient {
                retry_after,
            })?;

        self.emit(
            events::TIMER_RENDER,
            serde_json::json!({
                "handle": artifact.handle,
                "frame": frame,
            }),
        );
        Ok(())
    }

    async fn remove(&self, artifact: &ArtifactRef) -> Result<(), RenderError> {
        self.check_live(artifact)?;
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&artifact.handle);

        self.emit(
            events::TIMER_REMOVED,
            serde_json::json!({
                "handle": artifact.handle,
                "scope": artifact.scope,
            }),
        );
        Ok(())
    }
}
