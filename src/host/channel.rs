//! Command channel and router between a host process and the timer service.

use crate::error::{Result, TimerError};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_VERSION, EventEnvelope, ResponseEnvelope,
};
use crate::timer::{ScopeId, TimerId, TimerService};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

struct TimerCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

/// Sending half: submits commands and subscribes to timer events.
#[derive(Clone)]
pub struct TimerCommandClient {
    request_tx: mpsc::Sender<TimerCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl TimerCommandClient {
    /// Submit a command and wait for its response.
    ///
    /// Command failures (unknown timer, bad duration, …) come back as an
    /// error envelope; `Err` is reserved for an invalid envelope or a dead
    /// router.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidRequest`] for an envelope that fails validation,
    /// [`TimerError::Channel`] when the router is gone.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            TimerError::InvalidRequest(format!(
                "invalid command envelope {}: {e}",
                envelope.request_id
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(TimerCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| TimerError::Channel(format!("failed to send command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| TimerError::Channel(format!("command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Receiving half: routes commands to a [`TimerService`].
pub struct TimerCommandServer {
    request_rx: mpsc::Receiver<TimerCommandRequest>,
    service: TimerService,
}

/// Create a command channel whose client also observes `event_tx`, the
/// broadcast channel the render sink publishes on.
#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    service: TimerService,
) -> (TimerCommandClient, TimerCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    (
        TimerCommandClient {
            request_tx,
            event_tx,
        },
        TimerCommandServer {
            request_rx,
            service,
        },
    )
}

impl TimerCommandServer {
    /// Serve until every client is dropped.
    ///
    /// Each command runs on its own task so a slow toggle (render retry)
    /// does not hold up commands for other timers.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let service = self.service.clone();
            tokio::spawn(async move {
                let response = respond(&service, &request.envelope).await;
                if request.response_tx.send(response).is_err() {
                    debug!("command caller went away before the response");
                }
            });
        }
    }

    /// Route one envelope, turning failures into error envelopes.
    pub async fn handle(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        respond(&self.service, envelope).await
    }

    /// Route one envelope to the matching service call.
    ///
    /// # Errors
    ///
    /// Whatever the service or the payload parser reports.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        route(&self.service, envelope).await
    }
}

async fn respond(service: &TimerService, envelope: &CommandEnvelope) -> ResponseEnvelope {
    match route(service, envelope).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_input_error() {
                debug!(command = envelope.command.as_str(), "rejected command: {e}");
            } else {
                warn!(command = envelope.command.as_str(), "command failed: {e}");
            }
            ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
        }
    }
}

async fn route(service: &TimerService, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
    let request_id = envelope.request_id.clone();
    let payload = &envelope.payload;
    let command = envelope.command.as_str();

    match envelope.command {
        CommandName::HostPing => Ok(ResponseEnvelope::ok(
            request_id,
            serde_json::json!({"pong": true}),
        )),
        CommandName::HostVersion => Ok(ResponseEnvelope::ok(
            request_id,
            serde_json::json!({
                "contract_version": EVENT_VERSION,
                "channel": "timer_command_v1",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )),
        CommandName::TimerCreate => {
            let scope = parse_scope(payload, command)?;
            let id = match payload.get("args").and_then(serde_json::Value::as_str) {
                Some(args) => service.create_from_command(scope, args).await?,
                None => {
                    let duration = parse_string_field(payload, "duration", command)?;
                    let text = parse_string_field(payload, "text", command)?;
                    service.create(scope, &duration, &text).await?
                }
            };
            let timer = service.get(id)?;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"id": id, "timer": timer}),
            ))
        }
        CommandName::TimerToggle => {
            let id = parse_timer_id(payload, command)?;
            let paused = service.toggle(id).await?;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"id": id, "paused": paused}),
            ))
        }
        CommandName::TimerReset => {
            let id = parse_timer_id(payload, command)?;
            service.reset(id).await?;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"id": id, "reset": true}),
            ))
        }
        CommandName::TimerStopAll => {
            let scope = parse_optional_scope(payload, command)?;
            let stopped = service.stop_all(scope).await;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"stopped": stopped}),
            ))
        }
        CommandName::TimerList => {
            let scope = parse_optional_scope(payload, command)?;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"timers": service.list(scope)}),
            ))
        }
        CommandName::TimerGet => {
            let id = parse_timer_id(payload, command)?;
            let timer = service.get(id)?;
            Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"timer": timer}),
            ))
        }
        CommandName::RuntimeStop => Ok(ResponseEnvelope::ok(
            request_id,
            serde_json::json!({"accepted": true}),
        )),
    }
}

/// String field that may be blank; the service decides what blank means.
fn parse_string_field(payload: &serde_json::Value, field: &str, command: &str) -> Result<String> {
    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(raw)) => Ok(raw.trim().to_owned()),
        Some(_) => Err(TimerError::InvalidRequest(format!(
            "{command} payload.{field} must be a string"
        ))),
    }
}

fn parse_scope(payload: &serde_json::Value, command: &str) -> Result<ScopeId> {
    payload
        .get("scope")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| {
            TimerError::InvalidRequest(format!("{command} requires an integer payload.scope"))
        })
}

fn parse_optional_scope(payload: &serde_json::Value, command: &str) -> Result<Option<ScopeId>> {
    match payload.get("scope") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => raw.as_i64().map(Some).ok_or_else(|| {
            TimerError::InvalidRequest(format!(
                "{command} payload.scope must be an integer when provided"
            ))
        }),
    }
}

fn parse_timer_id(payload: &serde_json::Value, command: &str) -> Result<TimerId> {
    payload
        .get("id")
        .and_then(serde_json::Value::as_u64)
        .map(TimerId)
        .ok_or_else(|| {
            TimerError::InvalidRequest(format!("{command} requires a numeric payload.id"))
        })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::TimerConfig;
    use crate::timer::{MemoryStore, RecordingSink};
    use std::sync::Arc;

    fn make_server() -> TimerCommandServer {
        let service = TimerService::new(
            &TimerConfig::default(),
            Arc::new(RecordingSink::new()),
            Arc::new(MemoryStore::new()),
        );
        let (event_tx, _) = broadcast::channel(8);
        let (_client, server) = command_channel(8, event_tx, service);
        server
    }

    fn make_envelope(command: CommandName, payload: serde_json::Value) -> CommandEnvelope {
        CommandEnvelope::new("test-req-1", command, payload)
    }

    #[tokio::test]
    async fn create_with_args_returns_timer() {
        let server = make_server();
        let resp = server
            .route(&make_envelope(
                CommandName::TimerCreate,
                serde_json::json!({"scope": 4, "args": "5m 30s Tea is ready"}),
            ))
            .await
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.payload["timer"]["total"], 330);
        assert_eq!(resp.payload["timer"]["text"], "Tea is ready");
    }

    #[tokio::test]
    async fn create_with_duration_and_text() {
        let server = make_server();
        let resp = server
            .route(&make_envelope(
                CommandName::TimerCreate,
                serde_json::json!({"scope": 4, "duration": "2h", "text": "bread"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.payload["timer"]["remaining"], 7200);
    }

    #[tokio::test]
    async fn create_without_scope_is_invalid_request() {
        let server = make_server();
        let result = server
            .route(&make_envelope(
                CommandName::TimerCreate,
                serde_json::json!({"args": "5m tea"}),
            ))
            .await;
        assert!(matches!(result, Err(TimerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn missing_text_reports_no_duration() {
        let server = make_server();
        let resp = server
            .handle(&make_envelope(
                CommandName::TimerCreate,
                serde_json::json!({"scope": 1, "duration": "5m"}),
            ))
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.request_id, "test-req-1");
        assert!(resp.error.unwrap().contains("no duration"));
    }

    #[tokio::test]
    async fn toggle_unknown_timer_is_error_envelope() {
        let server = make_server();
        let resp = server
            .handle(&make_envelope(
                CommandName::TimerToggle,
                serde_json::json!({"id": 404}),
            ))
            .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("no longer active"));
    }

    #[tokio::test]
    async fn stop_all_rejects_non_integer_scope() {
        let server = make_server();
        let result = server
            .route(&make_envelope(
                CommandName::TimerStopAll,
                serde_json::json!({"scope": "chat"}),
            ))
            .await;
        assert!(matches!(result, Err(TimerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn version_reports_contract() {
        let server = make_server();
        let resp = server
            .route(&make_envelope(CommandName::HostVersion, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.payload["contract_version"], EVENT_VERSION);
    }
}
