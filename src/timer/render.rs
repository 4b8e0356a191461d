//! Render sink contract: how timer state reaches the user.

use crate::config::AppearanceConfig;
use crate::timer::duration::format_hms;
use crate::timer::{ScopeId, TimerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Failure reported by a [`RenderSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Rate limited or otherwise temporarily refused; retry after the delay.
    #[error("render refused; retry after {retry_after:?}")]
    Transient {
        /// Delay requested by the sink before the next attempt.
        retry_after: Duration,
    },
    /// Any other failure.
    #[error("render failed: {0}")]
    Permanent(String),
}

/// Handle to a visual artifact (message, widget) created by a sink.
///
/// References are tied to the process epoch of the sink that issued them.
/// After a restart the old references are meaningless and a new artifact has
/// to be opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Scope the artifact lives in.
    pub scope: ScopeId,
    /// Sink-assigned handle.
    pub handle: u64,
    /// Epoch of the sink instance that issued the handle.
    pub epoch: Uuid,
}

/// One visible state of a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFrame {
    pub timer_id: TimerId,
    pub scope: ScopeId,
    pub text: String,
    pub remaining: u64,
    pub paused: bool,
    /// Toggle control label, e.g. `"⏸️ 00:04:59"`.
    pub label: String,
    /// Reset control label; only offered while paused.
    pub reset_label: Option<String>,
}

impl RenderFrame {
    #[must_use]
    pub fn new(
        timer_id: TimerId,
        scope: ScopeId,
        text: &str,
        remaining: u64,
        paused: bool,
        appearance: &AppearanceConfig,
    ) -> Self {
        let emoji = if paused {
            &appearance.paused_emoji
        } else {
            &appearance.running_emoji
        };
        let clock = format_hms(i64::try_from(remaining).unwrap_or(i64::MAX));
        Self {
            timer_id,
            scope,
            text: text.to_owned(),
            remaining,
            paused,
            label: format!("{emoji} {clock}"),
            reset_label: paused.then(|| format!("{} Reset", appearance.reset_emoji)),
        }
    }
}

/// Surface that displays timers. Implementations may fail transiently.
#[async_trait]
pub trait RenderSink: Send + Sync {
    /// Create the visual artifact for a new (or recovered) timer.
    async fn open(
        &self,
        scope: ScopeId,
        text: &str,
        timer_id: TimerId,
    ) -> Result<ArtifactRef, RenderError>;

    /// Show `frame` on `artifact`.
    async fn render(&self, artifact: &ArtifactRef, frame: &RenderFrame) -> Result<(), RenderError>;

    /// Delete the artifact. Callers treat failures as non-fatal.
    async fn remove(&self, artifact: &ArtifactRef) -> Result<(), RenderError>;
}

/// In-memory sink that records everything and fails on demand.
///
/// Used by the test suites and handy for embedding the engine without a UI.
#[derive(Debug)]
pub struct RecordingSink {
    epoch: Uuid,
    state: Mutex<RecordingState>,
}

#[derive(Debug, Default)]
struct RecordingState {
    next_handle: u64,
    opened: Vec<ArtifactRef>,
    removed: Vec<ArtifactRef>,
    frames: Vec<RenderFrame>,
    scripted: HashMap<ScopeId, VecDeque<RenderError>>,
    broken_scopes: HashSet<ScopeId>,
    fail_open: bool,
    fail_remove: bool,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Uuid::new_v4(),
            state: Mutex::new(RecordingState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RecordingState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Queue a one-shot failure for the next render in `scope`.
    pub fn push_failure(&self, scope: ScopeId, error: RenderError) {
        self.with_state(|s| s.scripted.entry(scope).or_default().push_back(error));
    }

    /// Make every render in `scope` fail permanently.
    pub fn break_scope(&self, scope: ScopeId) {
        self.with_state(|s| {
            s.broken_scopes.insert(scope);
        });
    }

    /// Make `open` fail.
    pub fn fail_opens(&self, fail: bool) {
        self.with_state(|s| s.fail_open = fail);
    }

    /// Make `remove` fail.
    pub fn fail_removals(&self, fail: bool) {
        self.with_state(|s| s.fail_remove = fail);
    }

    /// Successfully rendered frames, in order.
    #[must_use]
    pub fn frames(&self) -> Vec<RenderFrame> {
        self.with_state(|s| s.frames.clone())
    }

    /// Successfully rendered frames for one timer.
    #[must_use]
    pub fn frames_for(&self, id: TimerId) -> Vec<RenderFrame> {
        self.with_state(|s| {
            s.frames
                .iter()
                .filter(|f| f.timer_id == id)
                .cloned()
                .collect()
        })
    }

    #[must_use]
    pub fn opened(&self) -> Vec<ArtifactRef> {
        self.with_state(|s| s.opened.clone())
    }

    /// Artifacts removed successfully.
    #[must_use]
    pub fn removed(&self) -> Vec<ArtifactRef> {
        self.with_state(|s| s.removed.clone())
    }

    fn check_epoch(&self, artifact: &ArtifactRef) -> Result<(), RenderError> {
        if artifact.epoch == self.epoch {
            Ok(())
        } else {
            Err(RenderError::Permanent(format!(
                "artifact {} belongs to another process",
                artifact.handle
            )))
        }
    }
}

#[async_trait]
impl RenderSink for RecordingSink {
    async fn open(
        &self,
        scope: ScopeId,
        _text: &str,
        _timer_id: TimerId,
    ) -> Result<ArtifactRef, RenderError> {
        self.with_state(|s| {
            if s.fail_open {
                return Err(RenderError::Permanent("open refused".to_owned()));
            }
            s.next_handle += 1;
            let artifact = ArtifactRef {
                scope,
                handle: s.next_handle,
                epoch: self.epoch,
            };
            s.opened.push(artifact.clone());
            Ok(artifact)
        })
    }

    async fn render(&self, artifact: &ArtifactRef, frame: &RenderFrame) -> Result<(), RenderError> {
        self.check_epoch(artifact)?;
        self.with_state(|s| {
            if let Some(err) = s.scripted.get_mut(&frame.scope).and_then(VecDeque::pop_front) {
                return Err(err);
            }
            if s.broken_scopes.contains(&frame.scope) {
                return Err(RenderError::Permanent("scope is broken".to_owned()));
            }
            s.frames.push(frame.clone());
            Ok(())
        })
    }

    async fn remove(&self, artifact: &ArtifactRef) -> Result<(), RenderError> {
        self.check_epoch(artifact)?;
        self.with_state(|s| {
            if s.fail_remove {
                return Err(RenderError::Permanent("delete refused".to_owned()));
            }
            s.removed.push(artifact.clone());
            Ok(())
        })
    }
}
