//! Callback handling: turns engine callbacks into session events.

use crate::engine::EngineCallback;
use crate::output_path::{HintOrigin, PathTracker};
use crate::progress::{clean_ansi_codes, normalize};
use crate::types::ProgressEvent;

use super::context::{SessionContext, SessionEvent};

/// What a session has learned from the callbacks seen so far
#[derive(Debug, Default)]
pub(super) struct CallbackState {
    /// Highest percentage emitted so far
    pub(super) percent: u8,
    pub(super) paths: PathTracker,
}

impl CallbackState {
    /// Clamp `percent` to the running maximum and remember it
    pub(super) fn advance(&mut self, percent: u8) -> u8 {
        self.percent = self.percent.max(percent.min(100));
        self.percent
    }
}

/// Handle one non-terminal callback
///
/// Path hints are recorded even after cancellation so that a completion seen
/// while draining resolves to the right file; only the emission is gated.
pub(super) async fn handle_callback(
    ctx: &SessionContext,
    state: &mut CallbackState,
    callback: EngineCallback,
) {
    match callback {
        EngineCallback::Progress(raw) => {
            if let Some(filename) = &raw.filename {
                state
                    .paths
                    .record(filename.as_str(), HintOrigin::IntermediateDownload);
            }
            let Some(percent) = normalize(&raw) else {
                tracing::trace!(task_id = ctx.id.0, "Progress callback without a usable value");
                return;
            };
            let event = ProgressEvent::downloading(state.advance(percent), &raw);
            ctx.emit([
                SessionEvent::Log(event.log_line()),
                SessionEvent::Progress(event),
            ])
            .await;
        }
        EngineCallback::Postprocess { stage, destination } => {
            let line = match &destination {
                Some(path) => {
                    state.paths.record(path.clone(), HintOrigin::Postprocessing);
                    format!("[{}] {}", stage, path.display())
                }
                None => format!("[{}] running", stage),
            };
            tracing::debug!(task_id = ctx.id.0, stage = %stage, "Postprocessing");
            let event = ProgressEvent::postprocessing(state.percent);
            ctx.emit([SessionEvent::Log(line), SessionEvent::Progress(event)])
                .await;
        }
        EngineCallback::Log(text) => {
            let text = clean_ansi_codes(&text);
            tracing::trace!(task_id = ctx.id.0, line = %text, "Engine output");
            ctx.emit([SessionEvent::Log(text)]).await;
        }
        EngineCallback::Completed(_) | EngineCallback::Error { .. } => {
            // Terminal callbacks are handled by the orchestration loop
        }
    }
}
