//! Newline-delimited JSON bridge for the timer command channel.
//!
//! Reads `CommandEnvelope` lines, dispatches them through the command
//! router, and writes `ResponseEnvelope` and `EventEnvelope` lines back.
//!
//! When run on stdin/stdout, stdout is exclusively reserved for the JSON
//! protocol; all diagnostic output (tracing, logs) must go to stderr.

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};
use crate::host::channel::{TimerCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::host::sink::EventRenderSink;
use crate::timer::{SnapshotStore, TimerService};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};

/// Request channel capacity for the bridge.
const REQUEST_CAPACITY: usize = 64;

/// Event broadcast channel capacity for the bridge.
const EVENT_CAPACITY: usize = 256;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Build the timer service on an event sink, recover saved timers, and serve
/// stdin/stdout until stdin closes or `runtime.stop` arrives.
///
/// # Errors
///
/// Returns an error if stdin cannot be read or stdout cannot be written.
pub async fn run_stdio_bridge(config: &TimerConfig, store: Arc<dyn SnapshotStore>) -> Result<()> {
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let sink = Arc::new(EventRenderSink::new(
        event_tx.clone(),
        config.render.max_messages_per_minute,
    ));
    let service = TimerService::new(config, sink, store);

    run_bridge(
        service,
        event_tx,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Serve the JSON protocol over an arbitrary reader/writer pair.
///
/// Saved timers are recovered after the event forwarder is subscribed, so
/// their `timer.opened` events reach the writer. Three activities run
/// concurrently: the reader on the current task, the event forwarder and
/// the command router on their own tasks. Dropping the client when the
/// reader finishes lets the router exit.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn run_bridge<R, W>(
    service: TimerService,
    event_tx: broadcast::Sender<EventEnvelope>,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(writer)));
    let event_handle = tokio::spawn(forward_events(event_tx.subscribe(), Arc::clone(&writer)));

    let report = service.recover().await;
    if !report.restored.is_empty() || report.skipped > 0 {
        info!(
            restored = report.restored.len(),
            skipped = report.skipped,
            "recovered saved timers"
        );
    }

    let (client, server) = command_channel(REQUEST_CAPACITY, event_tx, service);
    let server_handle = tokio::spawn(server.run());

    let reader_result = run_reader(client, reader, Arc::clone(&writer)).await;

    event_handle.abort();
    let _ = event_handle.await;
    let _ = server_handle.await;

    reader_result
}

async fn forward_events<W>(
    mut event_rx: broadcast::Receiver<EventEnvelope>,
    writer: SharedWriter<W>,
)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match event_rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    let mut w = writer.lock().await;
                    if let Err(e) = write_line(&mut w, &json).await {
                        warn!(error = %e, "cannot write event; stopping event forwarder");
                        break;
                    }
                }
                Err(e) => error!(error = %e, "cannot serialize event; skipping"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("event channel closed; stopping event forwarder");
                break;
            }
        }
    }
}

/// Read line by line, dispatch each command, and write responses.
async fn run_reader<R, W>(
    client: TimerCommandClient,
    mut reader: R,
    writer: SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TimerError::Channel(format!("failed to read command input: {e}")))?;

        if bytes_read == 0 {
            info!("command input closed; shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, raw_line = %trimmed, "cannot parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let request_id = envelope.request_id.clone();
        let is_stop = envelope.command == CommandName::RuntimeStop;

        let response = match client.send(envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "command dispatch failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_response(&writer, &response).await?;

        if is_stop {
            info!("runtime.stop received; shutting down bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response<W>(writer: &SharedWriter<W>, response: &ResponseEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)
        .map_err(|e| TimerError::Channel(format!("cannot serialize response: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W>(writer: &mut BufWriter<W>, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| TimerError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| TimerError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TimerError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
