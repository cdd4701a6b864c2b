//! Session orchestration: top-level lifecycle for a single download.

use crate::engine::{CallbackStream, Engine, EngineCallback};
use crate::error::DownloadError;
use crate::types::{DownloadTask, FailureKind, Outcome, TaskState};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::callbacks::{CallbackState, handle_callback};
use super::context::{
    Gate, SessionContext, SessionEvent, SessionEventSink, SessionHandle, SessionOptions,
};
use super::finalization::{StreamEnd, finalize_session};

/// Start a download session for `task`
///
/// Returns as soon as the session is spawned; everything else is reported
/// through `sink`. The session waits for a permit from `limiter` (staying
/// Queued meanwhile), invokes the engine and consumes its callbacks.
///
/// # Errors
///
/// - [`DownloadError::InvalidState`] if the task is not Queued
/// - [`DownloadError::OutputDirectory`] if the output directory cannot be created
pub async fn start(
    task: &DownloadTask,
    options: Arc<SessionOptions>,
    engine: Arc<dyn Engine>,
    sink: Arc<dyn SessionEventSink>,
    limiter: Arc<Semaphore>,
) -> Result<SessionHandle> {
    if task.state != TaskState::Queued {
        return Err(Error::Download(DownloadError::InvalidState {
            id: task.id,
            operation: "start".to_string(),
            current_state: task.state,
        }));
    }

    tokio::fs::create_dir_all(&options.destination)
        .await
        .map_err(|e| {
            Error::Download(DownloadError::OutputDirectory {
                path: options.destination.clone(),
                reason: e.to_string(),
            })
        })?;

    let ctx = SessionContext {
        id: task.id,
        url: task.url.clone(),
        options,
        engine,
        sink,
        limiter,
        gate: Arc::new(Mutex::new(Gate::default())),
        cancel: CancellationToken::new(),
    };
    let handle = SessionHandle {
        id: ctx.id,
        gate: ctx.gate.clone(),
        cancel: ctx.cancel.clone(),
        done: CancellationToken::new(),
    };

    tracing::debug!(task_id = ctx.id.0, url = %ctx.url, engine = ctx.engine.name(), "Starting download session");

    let done = handle.done.clone();
    let worker = tokio::spawn(run_session(ctx.clone()));
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            let message = if e.is_panic() {
                format!("download session crashed: {}", panic_message(e.into_panic()))
            } else {
                "download session was aborted".to_string()
            };
            tracing::error!(task_id = ctx.id.0, error = %message, "Download session crashed");
            ctx.finish(
                Outcome::Failed {
                    kind: FailureKind::Internal,
                    message,
                },
                None,
            )
            .await;
        }
        done.cancel();
    });

    Ok(handle)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Core session task
///
/// Phases:
/// 1. Wait for a concurrency permit (cancellation here skips the engine entirely)
/// 2. Invoke the engine
/// 3. Consume callbacks until a terminal one arrives or the stream ends
/// 4. Resolve the outcome and deliver it
async fn run_session(ctx: SessionContext) {
    let id = ctx.id;

    // Phase 1: concurrency slot
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            tracing::debug!(task_id = id.0, "Cancelled while waiting for a download slot");
            ctx.finish(Outcome::Cancelled, None).await;
            return;
        }
        permit = ctx.limiter.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                ctx.finish(
                    Outcome::Failed {
                        kind: FailureKind::Internal,
                        message: "download slots are no longer available".to_string(),
                    },
                    None,
                )
                .await;
                return;
            }
        },
    };

    // Phase 2: engine invocation
    let request = ctx.options.request(&ctx.url);
    let stream = match ctx.engine.invoke(request, ctx.cancel.child_token()).await {
        Ok(stream) => stream,
        Err(_) if ctx.is_cancelled() => {
            ctx.finish(Outcome::Cancelled, None).await;
            return;
        }
        Err(e) => {
            tracing::error!(task_id = id.0, error = %e, "Engine invocation failed");
            ctx.finish(
                Outcome::Failed {
                    kind: FailureKind::EngineInvocation,
                    message: e.to_string(),
                },
                None,
            )
            .await;
            return;
        }
    };
    tracing::info!(task_id = id.0, url = %ctx.url, "Download started");
    ctx.emit([SessionEvent::Started]).await;

    // Phase 3: callbacks
    let mut state = CallbackState::default();
    let end = consume_callbacks(&ctx, stream, &mut state).await;
    drop(permit);

    // Phase 4: outcome
    finalize_session(&ctx, state, end).await;
}

/// Consume callbacks until a terminal one arrives or the stream ends
///
/// After cancellation the stream keeps being drained for at most
/// `cancel_grace`, so an engine that finishes in the meantime still gets
/// its completion reported.
async fn consume_callbacks(
    ctx: &SessionContext,
    mut stream: CallbackStream,
    state: &mut CallbackState,
) -> StreamEnd {
    let mut drain_deadline: Option<tokio::time::Instant> = None;

    loop {
        let next = if ctx.is_cancelled() {
            let deadline = *drain_deadline
                .get_or_insert_with(|| tokio::time::Instant::now() + ctx.options.cancel_grace);
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        task_id = ctx.id.0,
                        grace_secs = ctx.options.cancel_grace.as_secs(),
                        "Engine did not stop within the cancellation grace period"
                    );
                    return StreamEnd::DrainTimedOut;
                }
            }
        } else {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => continue,
                next = stream.next() => next,
            }
        };

        match next {
            None => return StreamEnd::Closed,
            Some(EngineCallback::Completed(metadata)) => return StreamEnd::Completed(metadata),
            Some(EngineCallback::Error { class, message }) => {
                return StreamEnd::Error { class, message };
            }
            Some(callback) => handle_callback(ctx, state, callback).await,
        }
    }
}
