//! Countdown: chat-style countdown timers that survive restarts.
//!
//! Timers are created from durations like `"5m 30s"`, tick once per second
//! on their own tokio task, can be paused, resumed and reset, and are written
//! through to a snapshot on every change so a restarted process picks them
//! up again.
//!
//! # Architecture
//!
//! - **Registry**: owns every active timer and enforces the per-scope cap
//! - **Engine**: one countdown task per timer, render retries and eviction
//! - **Render sink**: pluggable surface that shows a timer (chat message,
//!   host events, in-memory recorder)
//! - **Snapshotter**: write-through persistence and startup recovery
//! - **Host**: newline-delimited JSON command protocol for driving timers
//!   from another process

pub mod config;
pub mod countdown_dirs;
pub mod error;
pub mod host;
pub mod timer;

pub use config::TimerConfig;
pub use error::{Result, TimerError};
pub use timer::{ScopeId, TimerId, TimerService, TimerView};
