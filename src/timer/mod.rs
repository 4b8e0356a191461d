//! Countdown timers.
//!
//! A [`TimerService`] owns the [`TimerRegistry`], runs one tokio task per
//! active timer through the [`engine`], pushes every visible change to a
//! [`RenderSink`], and writes the registry through to a [`Snapshotter`] on
//! every mutation so timers survive a restart.

pub mod duration;
pub mod engine;
pub mod persist;
pub mod registry;
pub mod render;
pub mod service;

use serde::{Deserialize, Serialize};

pub use duration::{format_hms, parse_duration, split_command_args};
pub use engine::{RecoveryReport, TimerEngine};
pub use persist::{JsonFileStore, MemoryStore, SnapshotStore, Snapshotter};
pub use registry::{TimerRegistry, TimerView};
pub use render::{ArtifactRef, RecordingSink, RenderError, RenderFrame, RenderSink};
pub use service::TimerService;

/// Bounding context for timers (e.g. a chat). Capacity is enforced per scope.
pub type ScopeId = i64;

/// Process-unique timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
