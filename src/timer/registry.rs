//! Authoritative in-memory store of active timers.
//!
//! The registry exclusively owns every [`TimerEntry`]. Engine tasks and
//! control calls resolve entries by id and share them through `Arc`; once an
//! entry is removed here it is no longer active, even if a clone is still
//! alive in a winding-down task.

use crate::error::{Result, TimerError};
use crate::timer::render::ArtifactRef;
use crate::timer::{ScopeId, TimerId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default per-scope timer cap.
pub const DEFAULT_MAX_PER_SCOPE: usize = 5;

/// Mutable countdown state of one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub total: u64,
    pub remaining: u64,
    pub paused: bool,
    pub render_failures: u32,
    /// Paused flag of the last successful render.
    pub rendered_paused: bool,
}

/// One registered timer.
///
/// Field mutations go through [`TimerEntry::update`], a short critical
/// section never held across an await. Multi-step operations on the same
/// timer (a tick, a toggle) additionally hold the entry's operation gate so
/// they never interleave.
#[derive(Debug)]
pub struct TimerEntry {
    id: TimerId,
    scope: ScopeId,
    text: String,
    state: Mutex<TimerState>,
    gate: tokio::sync::Mutex<()>,
    resume: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    artifact: Mutex<Option<ArtifactRef>>,
}

impl TimerEntry {
    fn new(id: TimerId, scope: ScopeId, text: String, remaining: u64, paused: bool) -> Self {
        let (resume, _) = watch::channel(false);
        Self {
            id,
            scope,
            text,
            state: Mutex::new(TimerState {
                total: remaining,
                remaining,
                paused,
                render_failures: 0,
                rendered_paused: paused,
            }),
            gate: tokio::sync::Mutex::new(()),
            resume,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            artifact: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> TimerId {
        self.id
    }

    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Copy of the current state.
    #[must_use]
    pub fn state(&self) -> TimerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the state under the entry lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Serialize a multi-step operation against this timer.
    pub async fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Raise the resume signal, waking a paused task immediately.
    pub fn set_resume(&self) {
        self.resume.send_replace(true);
    }

    /// Lower the resume signal before entering the paused state.
    pub fn clear_resume(&self) {
        self.resume.send_replace(false);
    }

    /// Wait until the resume signal is raised.
    pub async fn resumed(&self) {
        let mut rx = self.resume.subscribe();
        // The sender lives as long as `self`, so this only returns once raised.
        let _ = rx.wait_for(|raised| *raised).await;
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Store the countdown task handle. Returns `false` if one is already set.
    pub fn attach_task(&self, handle: JoinHandle<()>) -> bool {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            handle.abort();
            return false;
        }
        *slot = Some(handle);
        true
    }

    #[must_use]
    pub fn has_task(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    #[must_use]
    pub fn artifact(&self) -> Option<ArtifactRef> {
        self.artifact
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_artifact(&self, artifact: ArtifactRef) {
        *self.artifact.lock().unwrap_or_else(|e| e.into_inner()) = Some(artifact);
    }

    /// Point-in-time public view.
    #[must_use]
    pub fn view(&self) -> TimerView {
        let state = self.state();
        TimerView {
            id: self.id,
            scope: self.scope,
            text: self.text.clone(),
            total: state.total,
            remaining: state.remaining,
            paused: state.paused,
            render_failures: state.render_failures,
        }
    }
}

/// Read-only snapshot of a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerView {
    pub id: TimerId,
    pub scope: ScopeId,
    pub text: String,
    pub total: u64,
    pub remaining: u64,
    pub paused: bool,
    pub render_failures: u32,
}

/// Registry of active timers with a per-scope capacity.
#[derive(Debug)]
pub struct TimerRegistry {
    entries: Mutex<HashMap<TimerId, Arc<TimerEntry>>>,
    next_id: AtomicU64,
    max_per_scope: usize,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_SCOPE)
    }
}

impl TimerRegistry {
    #[must_use]
    pub fn new(max_per_scope: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_per_scope: max_per_scope.max(1),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<TimerId, Arc<TimerEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn max_per_scope(&self) -> usize {
        self.max_per_scope
    }

    /// Register a new running timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::TooManyTimers`] if `scope` is already at capacity.
    pub fn create(&self, scope: ScopeId, text: &str, duration_secs: u64) -> Result<TimerId> {
        self.insert(scope, text, duration_secs, false)
    }

    /// Re-register a timer recovered from a snapshot. Its total duration
    /// becomes whatever remained.
    ///
    /// # Errors
    ///
    /// [`TimerError::TooManyTimers`] if `scope` is already at capacity.
    pub fn restore(
        &self,
        scope: ScopeId,
        text: &str,
        remaining_secs: u64,
        paused: bool,
    ) -> Result<TimerId> {
        self.insert(scope, text, remaining_secs, paused)
    }

    fn insert(&self, scope: ScopeId, text: &str, secs: u64, paused: bool) -> Result<TimerId> {
        let mut entries = self.entries();
        let active = entries.values().filter(|e| e.scope == scope).count();
        if active >= self.max_per_scope {
            return Err(TimerError::TooManyTimers {
                scope,
                limit: self.max_per_scope,
            });
        }

        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = TimerEntry::new(id, scope, text.to_owned(), secs, paused);
        entries.insert(id, Arc::new(entry));
        Ok(id)
    }

    /// Point-in-time view of one timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotFound`] for unknown or finished timers.
    pub fn get(&self, id: TimerId) -> Result<TimerView> {
        self.entry(id)
            .map(|e| e.view())
            .ok_or(TimerError::NotFound(id))
    }

    /// Shared handle to a registered entry.
    #[must_use]
    pub fn entry(&self, id: TimerId) -> Option<Arc<TimerEntry>> {
        self.entries().get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Delete a timer. Removing an unknown id is a no-op.
    pub fn remove(&self, id: TimerId) -> Option<Arc<TimerEntry>> {
        self.entries().remove(&id)
    }

    #[must_use]
    pub fn active_count(&self, scope: ScopeId) -> usize {
        self.entries().values().filter(|e| e.scope == scope).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Ids of all timers, or of one scope, in creation order.
    #[must_use]
    pub fn ids(&self, scope: Option<ScopeId>) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self
            .entries()
            .values()
            .filter(|e| scope.is_none_or(|s| e.scope == s))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// All registered entries, in creation order.
    #[must_use]
    pub fn all_entries(&self) -> Vec<Arc<TimerEntry>> {
        let mut entries: Vec<Arc<TimerEntry>> = self.entries().values().cloned().collect();
        entries.sort_unstable_by_key(|e| e.id);
        entries
    }

    /// Views of all timers, or of one scope, in creation order.
    #[must_use]
    pub fn views(&self, scope: Option<ScopeId>) -> Vec<TimerView> {
        self.all_entries()
            .iter()
            .filter(|e| scope.is_none_or(|s| e.scope == s))
            .map(|e| e.view())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    #[test]
    fn create_initializes_full_running_state() {
        let registry = TimerRegistry::default();
        let id = registry.create(1, "tea", 90).unwrap();

        let view = registry.get(id).unwrap();
        assert_eq!(view.total, 90);
        assert_eq!(view.remaining, 90);
        assert!(!view.paused);
        assert_eq!(view.render_failures, 0);
        assert_eq!(view.text, "tea");
    }

    #[test]
    fn sixth_timer_in_scope_is_rejected() {
        let registry = TimerRegistry::default();
        for n in 0..5 {
            registry
                .create(7, &format!("t{n}"), 60)
                .expect("first five fit");
        }
        let err = registry.create(7, "t5", 60).unwrap_err();
        assert!(matches!(
            err,
            TimerError::TooManyTimers { scope: 7, limit: 5 }
        ));
        assert_eq!(registry.active_count(7), 5);

        // Other scopes keep their own budget.
        assert!(registry.create(8, "other", 60).is_ok());
    }

    #[test]
    fn remove_is_idempotent_and_frees_capacity() {
        let registry = TimerRegistry::new(1);
        let id = registry.create(1, "a", 10).unwrap();
        assert!(registry.create(1, "b", 10).is_err());

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(matches!(registry.get(id), Err(TimerError::NotFound(_))));
        assert!(registry.create(1, "b", 10).is_ok());
    }

    #[test]
    fn restore_uses_remaining_as_total() {
        let registry = TimerRegistry::default();
        let id = registry.restore(1, "hi", 5, true).unwrap();
        let view = registry.get(id).unwrap();
        assert_eq!(view.total, 5);
        assert_eq!(view.remaining, 5);
        assert!(view.paused);
    }

    #[test]
    fn ids_filter_by_scope_in_creation_order() {
        let registry = TimerRegistry::default();
        let a = registry.create(1, "a", 10).unwrap();
        let b = registry.create(2, "b", 10).unwrap();
        let c = registry.create(1, "c", 10).unwrap();

        assert_eq!(registry.ids(None), vec![a, b, c]);
        assert_eq!(registry.ids(Some(1)), vec![a, c]);
        assert_eq!(registry.views(Some(2))[0].text, "b");
    }

    #[tokio::test]
    async fn resume_signal_wakes_waiter() {
        let registry = TimerRegistry::default();
        let id = registry.create(1, "a", 10).unwrap();
        let entry = registry.entry(id).unwrap();
        entry.clear_resume();

        let waiter = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.resumed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        entry.set_resume();
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(joined.is_ok(), "waiter should wake on resume");
    }
}
