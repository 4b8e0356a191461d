//! Versioned command/event envelopes for driving timers from another process.

use serde::{Deserialize, Serialize};

/// Contract version for command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Command set understood by the timer host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "timer.create")]
    TimerCreate,
    #[serde(rename = "timer.toggle")]
    TimerToggle,
    #[serde(rename = "timer.reset")]
    TimerReset,
    #[serde(rename = "timer.stop_all")]
    TimerStopAll,
    #[serde(rename = "timer.list")]
    TimerList,
    #[serde(rename = "timer.get")]
    TimerGet,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::TimerCreate => "timer.create",
            Self::TimerToggle => "timer.toggle",
            Self::TimerReset => "timer.reset",
            Self::TimerStopAll => "timer.stop_all",
            Self::TimerList => "timer.list",
            Self::TimerGet => "timer.get",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "timer.create" => Some(Self::TimerCreate),
            "timer.toggle" => Some(Self::TimerToggle),
            "timer.reset" => Some(Self::TimerReset),
            "timer.stop_all" => Some(Self::TimerStopAll),
            "timer.list" => Some(Self::TimerList),
            "timer.get" => Some(Self::TimerGet),
            "runtime.stop" => Some(Self::RuntimeStop),
            _ => None,
        }
    }
}

/// Event names published by the host.
pub mod events {
    /// A timer display was created.
    pub const TIMER_OPENED: &str = "timer.opened";
    /// A timer display shows a new frame.
    pub const TIMER_RENDER: &str = "timer.render";
    /// A timer display was deleted.
    pub const TIMER_REMOVED: &str = "timer.removed";
}

/// A versioned response envelope from host -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from caller -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractError`] for a foreign version or a blank request id.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from host -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn command_names_round_trip_through_wire_format() {
        for name in [
            CommandName::HostPing,
            CommandName::HostVersion,
            CommandName::TimerCreate,
            CommandName::TimerToggle,
            CommandName::TimerReset,
            CommandName::TimerStopAll,
            CommandName::TimerList,
            CommandName::TimerGet,
            CommandName::RuntimeStop,
        ] {
            assert_eq!(CommandName::parse(name.as_str()), Some(name));
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
        assert_eq!(CommandName::parse("timer.explode"), None);
    }

    #[test]
    fn envelope_without_payload_defaults_to_null() {
        let parsed: CommandEnvelope =
            serde_json::from_str(r#"{"v":1,"request_id":"r1","command":"timer.list"}"#).unwrap();
        assert_eq!(parsed.command, CommandName::TimerList);
        assert!(parsed.payload.is_null());
    }

    #[test]
    fn validate_rejects_foreign_version_and_blank_id() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, serde_json::json!({}));
        assert!(envelope.validate().is_ok());

        envelope.v = 2;
        let err = envelope.validate().unwrap_err();
        assert_eq!(err.kind, ContractErrorKind::UnsupportedVersion);

        let blank = CommandEnvelope::new("  ", CommandName::HostPing, serde_json::json!({}));
        assert_eq!(
            blank.validate().unwrap_err().kind,
            ContractErrorKind::InvalidEnvelope
        );
    }
}
