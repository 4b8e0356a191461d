//! Public control surface for timers.

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};
use crate::timer::duration::{parse_duration, split_command_args};
use crate::timer::engine::{RecoveryReport, TimerEngine};
use crate::timer::persist::{SnapshotStore, Snapshotter};
use crate::timer::registry::{TimerRegistry, TimerView};
use crate::timer::render::RenderSink;
use crate::timer::{ScopeId, TimerId};
use std::sync::Arc;

/// Creates, toggles, resets and lists timers.
///
/// Cheap to clone; clones share the same registry and tasks.
#[derive(Clone)]
pub struct TimerService {
    engine: TimerEngine,
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("timers", &self.engine.registry().len())
            .finish_non_exhaustive()
    }
}

impl TimerService {
    pub fn new(
        config: &TimerConfig,
        sink: Arc<dyn RenderSink>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let registry = Arc::new(TimerRegistry::new(config.limits.max_timers_per_scope));
        let snapshotter = Arc::new(Snapshotter::new(store, config.persistence.identity.clone()));
        Self {
            engine: TimerEngine::new(config, registry, sink, snapshotter),
        }
    }

    /// Restart timers saved by a previous process. Call once at startup.
    pub async fn recover(&self) -> RecoveryReport {
        self.engine.recover().await
    }

    /// Start a timer from a duration like `"5m 30s"` and its display text.
    ///
    /// # Errors
    ///
    /// - [`TimerError::NoDuration`] when the duration or the text is blank.
    /// - [`TimerError::InvalidFormat`] when the duration does not parse.
    /// - [`TimerError::TooManyTimers`] when the scope is full.
    /// - [`TimerError::Render`] when the display cannot be created.
    pub async fn create(&self, scope: ScopeId, duration: &str, text: &str) -> Result<TimerId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TimerError::NoDuration);
        }
        let seconds = parse_duration(duration)?;
        self.engine.launch(scope, text, seconds).await
    }

    /// Start a timer from chat-style arguments, e.g. `"10m Tea is ready"`.
    ///
    /// # Errors
    ///
    /// Same as [`TimerService::create`].
    pub async fn create_from_command(&self, scope: ScopeId, args: &str) -> Result<TimerId> {
        let (seconds, text) = split_command_args(args)?;
        self.engine.launch(scope, &text, seconds).await
    }

    /// Pause or resume a timer. Returns `true` when it is now paused.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] for unknown or finished timers.
    pub async fn toggle(&self, id: TimerId) -> Result<bool> {
        self.engine.toggle(id).await
    }

    /// Stop and delete a timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] for unknown or finished timers.
    pub async fn reset(&self, id: TimerId) -> Result<()> {
        self.engine.stop(id).await
    }

    /// Stop every timer, or those of one scope. Returns how many were stopped.
    pub async fn stop_all(&self, scope: Option<ScopeId>) -> usize {
        self.engine.stop_all(scope).await
    }

    /// Current state of one timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] for unknown or finished timers.
    pub fn get(&self, id: TimerId) -> Result<TimerView> {
        self.engine.registry().get(id)
    }

    /// Active timers, optionally restricted to one scope.
    #[must_use]
    pub fn list(&self, scope: Option<ScopeId>) -> Vec<TimerView> {
        self.engine.registry().views(scope)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TimerRegistry> {
        self.engine.registry()
    }
}
