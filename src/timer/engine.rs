//! Per-timer countdown tasks.
//!
//! Every active timer runs its own tokio task:
//!
//! ```text
//!            toggle                 toggle
//!   Running ───────▶ Paused ───────▶ Running ──▶ … ──▶ Finished
//!      │   (render, persist)   (wake, render, persist)       │
//!      └── reset / stop from any state: cancel, remove ◀─────┘
//! ```
//!
//! A task only knows its timer id and cancellation token; the entry itself
//! stays owned by the [`TimerRegistry`]. Ticks and toggles on the same timer
//! are serialized through the entry's operation gate.

use crate::config::{AppearanceConfig, TimerConfig};
use crate::error::{Result, TimerError};
use crate::timer::persist::Snapshotter;
use crate::timer::registry::{TimerEntry, TimerRegistry};
use crate::timer::render::{ArtifactRef, RenderError, RenderFrame, RenderSink};
use crate::timer::{ScopeId, TimerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct EngineSettings {
    tick: Duration,
    finish_linger: Duration,
    toggle_retry_delay: Duration,
    max_render_failures: u32,
    appearance: AppearanceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderOutcome {
    Rendered,
    Failed,
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Finished,
    Evicted,
    Gone,
}

/// Outcome of startup recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// New ids of the timers that were restarted.
    pub restored: Vec<TimerId>,
    /// Saved timers that could not be restarted.
    pub skipped: usize,
}

/// Drives timer tasks, the render sink and the snapshotter.
#[derive(Clone)]
pub struct TimerEngine {
    registry: Arc<TimerRegistry>,
    sink: Arc<dyn RenderSink>,
    snapshotter: Arc<Snapshotter>,
    settings: Arc<EngineSettings>,
}

impl TimerEngine {
    pub fn new(
        config: &TimerConfig,
        registry: Arc<TimerRegistry>,
        sink: Arc<dyn RenderSink>,
        snapshotter: Arc<Snapshotter>,
    ) -> Self {
        let settings = EngineSettings {
            tick: config.timing.tick_interval(),
            finish_linger: config.timing.finish_linger(),
            toggle_retry_delay: config.timing.toggle_retry_delay(),
            max_render_failures: config.limits.max_render_failures.max(1),
            appearance: config.appearance.clone(),
        };
        Self {
            registry,
            sink,
            snapshotter,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TimerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn snapshotter(&self) -> &Arc<Snapshotter> {
        &self.snapshotter
    }

    /// Register a timer, open its artifact and start counting down.
    ///
    /// # Errors
    ///
    /// [`TimerError::TooManyTimers`] when the scope is full,
    /// [`TimerError::Render`] when the sink cannot open an artifact.
    pub async fn launch(&self, scope: ScopeId, text: &str, duration_secs: u64) -> Result<TimerId> {
        let id = self.registry.create(scope, text, duration_secs)?;
        let entry = self.registry.entry(id).ok_or(TimerError::NotFound(id))?;

        match self.sink.open(scope, text, id).await {
            Ok(artifact) => entry.set_artifact(artifact),
            Err(e) => {
                self.registry.remove(id);
                return Err(TimerError::Render(format!("cannot open timer display: {e}")));
            }
        }

        self.snapshotter.persist(&self.registry);
        self.spawn(&entry);
        info!(timer_id = %id, scope, duration_secs, "timer started");
        Ok(id)
    }

    /// Start the countdown task for `entry` unless one is already running.
    fn spawn(&self, entry: &TimerEntry) -> bool {
        if entry.has_task() {
            debug!(timer_id = %entry.id(), "timer task already running");
            return false;
        }
        let engine = self.clone();
        let cancel = entry.cancel_token().clone();
        let handle = tokio::spawn(engine.run_timer(entry.id(), cancel));
        entry.attach_task(handle)
    }

    async fn run_timer(self, id: TimerId, cancel: CancellationToken) {
        let exit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            exit = self.countdown(id) => Some(exit),
        };

        match exit {
            None => debug!(timer_id = %id, "timer task cancelled"),
            Some(Exit::Finished) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(timer_id = %id, "timer cancelled while finishing");
                    }
                    () = self.finish(id) => {}
                }
            }
            Some(Exit::Evicted) => debug!(timer_id = %id, "timer task stopped after eviction"),
            Some(Exit::Gone) => debug!(timer_id = %id, "timer removed externally"),
        }
    }

    async fn countdown(&self, id: TimerId) -> Exit {
        loop {
            let Some(entry) = self.registry.entry(id) else {
                return Exit::Gone;
            };
            let state = entry.state();
            if state.remaining == 0 {
                return Exit::Finished;
            }

            if state.paused {
                tokio::select! {
                    () = entry.resumed() => {}
                    () = tokio::time::sleep(self.settings.tick) => {}
                }

                let _ops = entry.lock_ops().await;
                let state = entry.state();
                if state.paused != state.rendered_paused
                    && self
                        .render_counted(&entry, state.remaining, state.paused)
                        .await
                        == RenderOutcome::Evicted
                {
                    return Exit::Evicted;
                }
                continue;
            }

            {
                let _ops = entry.lock_ops().await;
                let state = entry.state();
                if state.paused {
                    continue;
                }

                if self.render_counted(&entry, state.remaining, false).await
                    == RenderOutcome::Evicted
                {
                    return Exit::Evicted;
                }

                let remaining = entry.update(|s| {
                    s.remaining = s.remaining.saturating_sub(1);
                    s.remaining
                });
                self.snapshotter.persist(&self.registry);
                debug!(timer_id = %id, remaining, "tick");

                if remaining == 0 {
                    return Exit::Finished;
                }
            }

            drop(entry);
            tokio::time::sleep(self.settings.tick).await;
        }
    }

    /// Show `00:00:00`, let it linger, then clean up.
    async fn finish(&self, id: TimerId) {
        let Some(entry) = self.registry.entry(id) else {
            return;
        };

        if let Some(artifact) = entry.artifact() {
            let frame = self.frame(&entry, 0, false);
            if let Err(e) = self.render_with_retry(&artifact, &frame).await {
                warn!(timer_id = %id, "final render failed: {e}");
            }
        }
        tokio::time::sleep(self.settings.finish_linger).await;

        self.remove_artifact(&entry).await;
        self.registry.remove(id);
        self.snapshotter.persist(&self.registry);
        info!(timer_id = %id, scope = entry.scope(), "timer finished");
    }

    fn is_active(&self, entry: &TimerEntry) -> bool {
        self.registry.contains(entry.id()) && !entry.is_cancelled() && entry.state().remaining > 0
    }

    /// Pause a running timer or resume a paused one. Returns the new paused flag.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] when the timer is unknown, finished, being
    /// stopped, or got evicted while rendering the new state.
    pub async fn toggle(&self, id: TimerId) -> Result<bool> {
        let entry = self
            .registry
            .entry(id)
            .filter(|e| self.is_active(e))
            .ok_or(TimerError::NotFound(id))?;

        let _ops = entry.lock_ops().await;
        if !self.is_active(&entry) {
            return Err(TimerError::NotFound(id));
        }

        let paused = entry.update(|s| {
            s.paused = !s.paused;
            s.paused
        });
        if paused {
            entry.clear_resume();
        } else {
            entry.set_resume();
        }

        // The delayed second attempt belongs to the same toggle, so only the
        // final result is counted.
        let remaining = entry.state().remaining;
        let mut result = self.render_frame(&entry, remaining, paused).await;
        if result.is_err() {
            tokio::time::sleep(self.settings.toggle_retry_delay).await;
            result = self.render_frame(&entry, remaining, paused).await;
        }
        if self.account_render(&entry, paused, result) == RenderOutcome::Evicted {
            return Err(TimerError::NotFound(id));
        }

        self.snapshotter.persist(&self.registry);
        info!(timer_id = %id, paused, remaining, "timer toggled");
        Ok(paused)
    }

    /// Stop and delete one timer, whatever state it is in.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] when the timer is unknown or already stopping.
    pub async fn stop(&self, id: TimerId) -> Result<()> {
        let entry = self
            .registry
            .entry(id)
            .filter(|e| !e.is_cancelled())
            .ok_or(TimerError::NotFound(id))?;

        entry.cancel_token().cancel();
        if self.teardown(entry).await {
            info!(timer_id = %id, "timer reset");
            Ok(())
        } else {
            Err(TimerError::NotFound(id))
        }
    }

    /// Stop every timer, or every timer of one scope. Returns how many were removed.
    ///
    /// Timers are cancelled up front and cleaned up independently; a slow or
    /// failing cleanup does not hold back the others.
    pub async fn stop_all(&self, scope: Option<ScopeId>) -> usize {
        let entries: Vec<Arc<TimerEntry>> = self
            .registry
            .all_entries()
            .into_iter()
            .filter(|e| scope.is_none_or(|s| e.scope() == s) && !e.is_cancelled())
            .collect();

        for entry in &entries {
            entry.cancel_token().cancel();
        }

        let mut cleanups = JoinSet::new();
        for entry in entries {
            let engine = self.clone();
            cleanups.spawn(async move { engine.teardown(entry).await });
        }

        let mut stopped = 0;
        while let Some(joined) = cleanups.join_next().await {
            match joined {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => warn!("timer cleanup task failed: {e}"),
            }
        }

        self.snapshotter.persist(&self.registry);
        info!(stopped, scope = ?scope, "stopped timers");
        stopped
    }

    /// Wait for a cancelled timer's task, then remove its artifact and entry.
    ///
    /// Holds the operation gate so an in-flight toggle completes first.
    async fn teardown(&self, entry: Arc<TimerEntry>) -> bool {
        let _ops = entry.lock_ops().await;
        if let Some(handle) = entry.take_task()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(timer_id = %entry.id(), "timer task panicked: {e}");
        }

        self.remove_artifact(&entry).await;
        let removed = self.registry.remove(entry.id()).is_some();
        self.snapshotter.persist(&self.registry);
        removed
    }

    /// Drop a timer that keeps failing to render. No further rendering.
    fn evict(&self, entry: &TimerEntry) {
        entry.cancel_token().cancel();
        self.registry.remove(entry.id());
        self.snapshotter.persist(&self.registry);
        warn!(
            timer_id = %entry.id(),
            scope = entry.scope(),
            "too many render failures; timer evicted"
        );
    }

    fn frame(&self, entry: &TimerEntry, remaining: u64, paused: bool) -> RenderFrame {
        RenderFrame::new(
            entry.id(),
            entry.scope(),
            entry.text(),
            remaining,
            paused,
            &self.settings.appearance,
        )
    }

    /// Render and account the result on the timer's failure counter.
    async fn render_counted(
        &self,
        entry: &TimerEntry,
        remaining: u64,
        paused: bool,
    ) -> RenderOutcome {
        let result = self.render_frame(entry, remaining, paused).await;
        self.account_render(entry, paused, result)
    }

    async fn render_frame(
        &self,
        entry: &TimerEntry,
        remaining: u64,
        paused: bool,
    ) -> std::result::Result<(), RenderError> {
        let frame = self.frame(entry, remaining, paused);
        match entry.artifact() {
            Some(artifact) => self.render_with_retry(&artifact, &frame).await,
            None => Err(RenderError::Permanent("timer has no display".to_owned())),
        }
    }

    /// Reset the failure counter on success, count one failure otherwise.
    fn account_render(
        &self,
        entry: &TimerEntry,
        paused: bool,
        result: std::result::Result<(), RenderError>,
    ) -> RenderOutcome {
        match result {
            Ok(()) => {
                entry.update(|s| {
                    s.render_failures = 0;
                    s.rendered_paused = paused;
                });
                RenderOutcome::Rendered
            }
            Err(e) => {
                let failures = entry.update(|s| {
                    s.render_failures = s.render_failures.saturating_add(1);
                    s.render_failures
                });
                warn!(timer_id = %entry.id(), failures, "render failed: {e}");
                if failures >= self.settings.max_render_failures {
                    self.evict(entry);
                    RenderOutcome::Evicted
                } else {
                    RenderOutcome::Failed
                }
            }
        }
    }

    /// One render; a transient refusal is retried exactly once after the
    /// sink's delay.
    async fn render_with_retry(
        &self,
        artifact: &ArtifactRef,
        frame: &RenderFrame,
    ) -> std::result::Result<(), RenderError> {
        match self.sink.render(artifact, frame).await {
            Err(RenderError::Transient { retry_after }) => {
                debug!(timer_id = %frame.timer_id, ?retry_after, "render deferred by sink");
                tokio::time::sleep(retry_after).await;
                self.sink.render(artifact, frame).await
            }
            other => other,
        }
    }

    /// Best-effort artifact removal. Errors are logged and swallowed.
    async fn remove_artifact(&self, entry: &TimerEntry) {
        let Some(artifact) = entry.artifact() else {
            return;
        };
        let result = match self.sink.remove(&artifact).await {
            Err(RenderError::Transient { retry_after }) => {
                tokio::time::sleep(retry_after).await;
                self.sink.remove(&artifact).await
            }
            other => other,
        };
        if let Err(e) = result {
            warn!(timer_id = %entry.id(), "could not remove timer display: {e}");
        }
    }

    /// Restart every unexpired timer from the snapshot.
    ///
    /// Each saved timer gets a fresh artifact and a new id; its total duration
    /// becomes whatever remained. Broken entries are skipped one by one and
    /// the snapshot is rewritten under the new ids.
    pub async fn recover(&self) -> RecoveryReport {
        let mut saved = match self.snapshotter.load() {
            Ok(saved) => saved,
            Err(e) => {
                warn!("cannot load saved timers, starting empty: {e}");
                return RecoveryReport::default();
            }
        };
        saved.sort_by_key(|t| t.previous_id.parse::<u64>().unwrap_or(u64::MAX));

        let mut report = RecoveryReport::default();
        for timer in saved {
            let id = match self
                .registry
                .restore(timer.scope, &timer.text, timer.remaining, timer.paused)
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(previous_id = %timer.previous_id, "cannot restore saved timer: {e}");
                    report.skipped += 1;
                    continue;
                }
            };
            let Some(entry) = self.registry.entry(id) else {
                report.skipped += 1;
                continue;
            };

            match self.sink.open(timer.scope, &timer.text, id).await {
                Ok(artifact) => entry.set_artifact(artifact),
                Err(e) => {
                    warn!(previous_id = %timer.previous_id, "cannot reopen timer display: {e}");
                    self.registry.remove(id);
                    report.skipped += 1;
                    continue;
                }
            }

            // A paused task does not render on its own until toggled.
            if timer.paused
                && self.render_counted(&entry, timer.remaining, true).await
                    == RenderOutcome::Evicted
            {
                report.skipped += 1;
                continue;
            }

            self.spawn(&entry);
            info!(
                timer_id = %id,
                previous_id = %timer.previous_id,
                remaining = timer.remaining,
                paused = timer.paused,
                "timer restored"
            );
            report.restored.push(id);
        }

        self.snapshotter.persist(&self.registry);
        report
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::timer::persist::{MemoryStore, SnapshotStore};
    use crate::timer::render::RecordingSink;
    use std::time::Instant;

    fn fast_config(tick_ms: u64) -> TimerConfig {
        let mut config = TimerConfig::default();
        config.timing.tick_interval_ms = tick_ms;
        config.timing.finish_linger_ms = 5;
        config.timing.toggle_retry_delay_ms = 5;
        config
    }

    fn engine_with(config: &TimerConfig) -> (TimerEngine, Arc<RecordingSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let engine = TimerEngine::new(
            config,
            Arc::new(TimerRegistry::new(config.limits.max_timers_per_scope)),
            sink.clone(),
            Arc::new(Snapshotter::new(store.clone(), "test")),
        );
        (engine, sink, store)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn counts_down_renders_zero_and_cleans_up() {
        let (engine, sink, _store) = engine_with(&fast_config(10));
        let id = engine.launch(1, "eggs", 3).await.unwrap();

        assert!(wait_until(|| !engine.registry().contains(id)).await);

        let shown: Vec<u64> = sink.frames_for(id).iter().map(|f| f.remaining).collect();
        assert_eq!(shown, vec![3, 2, 1, 0]);
        assert_eq!(sink.removed().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_and_not_counted() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        sink.push_failure(
            4,
            RenderError::Transient {
                retry_after: Duration::from_millis(5),
            },
        );
        let id = engine.launch(4, "tea", 60).await.unwrap();

        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);
        let view = engine.registry().get(id).unwrap();
        assert_eq!(view.render_failures, 0);
        assert_eq!(sink.frames_for(id)[0].remaining, 60);

        engine.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn second_transient_failure_counts() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        let transient = RenderError::Transient {
            retry_after: Duration::from_millis(1),
        };
        sink.push_failure(4, transient.clone());
        sink.push_failure(4, transient);
        let id = engine.launch(4, "tea", 60).await.unwrap();

        assert!(
            wait_until(|| engine
                .registry()
                .get(id)
                .is_ok_and(|v| v.render_failures == 1))
            .await
        );
        assert!(sink.frames_for(id).is_empty());

        engine.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_sleep() {
        let (engine, sink, store) = engine_with(&fast_config(60_000));
        let id = engine.launch(1, "long", 3600).await.unwrap();
        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);

        let started = Instant::now();
        engine.stop(id).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(matches!(engine.registry().get(id), Err(TimerError::NotFound(_))));
        assert_eq!(store.load("test").unwrap(), Some(serde_json::json!({})));
        assert!(matches!(engine.stop(id).await, Err(TimerError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_artifact_cleanup_is_swallowed() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        sink.fail_removals(true);
        let id = engine.launch(1, "x", 60).await.unwrap();

        assert!(engine.stop(id).await.is_ok());
        assert!(!engine.registry().contains(id));
        assert!(sink.removed().is_empty());
    }

    #[tokio::test]
    async fn open_failure_leaves_no_timer_behind() {
        let (engine, sink, store) = engine_with(&fast_config(1000));
        sink.fail_opens(true);

        let err = engine.launch(1, "x", 60).await.unwrap_err();
        assert!(matches!(err, TimerError::Render(_)));
        assert!(engine.registry().is_empty());
        assert_eq!(store.load("test").unwrap(), None);
    }

    #[tokio::test]
    async fn failed_toggle_render_counts_once() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        let id = engine.launch(1, "tea", 600).await.unwrap();
        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);

        sink.push_failure(1, RenderError::Permanent("edit refused".to_owned()));
        sink.push_failure(1, RenderError::Permanent("edit refused".to_owned()));
        assert!(engine.toggle(id).await.unwrap());

        let view = engine.registry().get(id).unwrap();
        assert!(view.paused);
        assert_eq!(view.render_failures, 1);

        engine.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn toggle_retry_success_clears_failures() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        let id = engine.launch(1, "tea", 600).await.unwrap();
        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);

        sink.push_failure(1, RenderError::Permanent("edit refused".to_owned()));
        assert!(engine.toggle(id).await.unwrap());

        let view = engine.registry().get(id).unwrap();
        assert_eq!(view.render_failures, 0);
        assert!(sink.frames_for(id).last().unwrap().paused);

        engine.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_waits_for_an_in_flight_toggle() {
        let (engine, sink, _store) = engine_with(&fast_config(1000));
        let id = engine.launch(1, "tea", 600).await.unwrap();
        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);

        // The toggle's render is deferred, so it holds the gate for a while.
        sink.push_failure(
            1,
            RenderError::Transient {
                retry_after: Duration::from_millis(200),
            },
        );
        let toggling = tokio::spawn({
            let engine = engine.clone();
            async move { engine.toggle(id).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.stop(id).await.unwrap();
        assert!(sink.frames_for(id).last().unwrap().paused);
        assert_eq!(sink.removed().len(), 1);
        assert!(toggling.await.unwrap().unwrap());
        assert!(matches!(engine.toggle(id).await, Err(TimerError::NotFound(_))));
    }

    #[tokio::test]
    async fn toggle_unknown_timer_is_not_found() {
        let (engine, _sink, _store) = engine_with(&fast_config(1000));
        assert!(matches!(
            engine.toggle(TimerId(999)).await,
            Err(TimerError::NotFound(TimerId(999)))
        ));
    }

    #[tokio::test]
    async fn resume_wakes_paused_task_without_waiting_for_timeout() {
        let (engine, sink, _store) = engine_with(&fast_config(1500));
        let id = engine.launch(1, "x", 600).await.unwrap();
        assert!(wait_until(|| !sink.frames_for(id).is_empty()).await);

        assert!(engine.toggle(id).await.unwrap());
        // Let the task leave its running sleep and settle into the paused wait.
        tokio::time::sleep(Duration::from_millis(1700)).await;
        let before = engine.registry().get(id).unwrap().remaining;

        let resumed_at = Instant::now();
        assert!(!engine.toggle(id).await.unwrap());
        assert!(
            wait_until(|| engine
                .registry()
                .get(id)
                .is_ok_and(|v| v.remaining < before))
            .await
        );
        assert!(resumed_at.elapsed() < Duration::from_millis(700));

        engine.stop(id).await.unwrap();
    }
}
