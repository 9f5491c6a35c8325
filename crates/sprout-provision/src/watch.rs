//! Background tasks tied to one instance: status polling and log copying.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runtime::DynRuntime;
use crate::state::{Event, State};

const STATUS_BUFFER: usize = 16;

/// Poll `id` and emit an [`Event`] whenever its state changes.
///
/// The stream ends once the instance exits or dies, the token is cancelled,
/// or the receiver is dropped. An instance that is not ready within
/// `ready_timeout` gets a final [`Event::Error`].
pub fn watch_status(
    runtime: DynRuntime,
    id: String,
    poll_interval: Duration,
    ready_timeout: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(STATUS_BUFFER);
    tokio::spawn(async move {
        let deadline = Instant::now() + ready_timeout;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<State> = None;
        let mut was_ready = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let state = match runtime.inspect(&id).await {
                Ok(details) => State::from_runtime_status(&details.status, details.healthy),
                Err(err) if err.is_not_found() => State::Dead,
                Err(err) => {
                    let _ = tx.send(Event::Error(err.to_string())).await;
                    break;
                }
            };

            if last != Some(state) {
                debug!(instance = %id, %state, "status changed");
                last = Some(state);
                if tx.send(Event::Status(state)).await.is_err() {
                    break;
                }
            }
            was_ready |= state.is_ready();
            if state.is_terminal() {
                break;
            }
            if !was_ready && Instant::now() >= deadline {
                let message = format!("not ready after {ready_timeout:?}");
                let _ = tx.send(Event::Error(message)).await;
                break;
            }
        }
        debug!(instance = %id, "status watch finished");
    });
    rx
}

/// Copy the instance's log stream to stderr until it ends.
pub fn copy_logs_to_stderr(runtime: DynRuntime, id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        copy_logs(runtime, &id, tokio::io::stderr()).await;
    })
}

/// Drain `id`'s logs into `out`, returning it once the stream ends or fails.
pub async fn copy_logs<W>(runtime: DynRuntime, id: &str, mut out: W) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut logs = match runtime.stream_logs(id).await {
        Ok(logs) => logs,
        Err(err) => {
            warn!(instance = %id, error = %err, "log stream unavailable");
            return out;
        }
    };
    while let Some(chunk) = logs.next().await {
        match chunk {
            Ok(bytes) => {
                if out.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(instance = %id, error = %err, "log stream failed");
                break;
            }
        }
    }
    let _ = out.flush().await;
    out
}
