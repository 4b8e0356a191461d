//! Process-facing surface: a JSON command protocol over stdin/stdout and a
//! render sink that publishes timer displays as events.

pub mod channel;
pub mod contract;
pub mod rate_limit;
pub mod sink;
pub mod stdio;

pub use channel::{TimerCommandClient, TimerCommandServer, command_channel};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use sink::EventRenderSink;
pub use stdio::{run_bridge, run_stdio_bridge};
