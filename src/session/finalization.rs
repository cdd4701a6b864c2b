//! Session finalization: decide the terminal outcome from how the callback stream ended.

use crate::engine::{EngineMetadata, ErrorClass};
use crate::output_path::HintOrigin;
use crate::types::{FailureKind, Outcome};

use super::callbacks::CallbackState;
use super::context::{SessionContext, SessionEvent};

/// How the callback stream ended
#[derive(Debug)]
pub(super) enum StreamEnd {
    /// The engine reported completion
    Completed(EngineMetadata),
    /// The engine reported an error
    Error { class: ErrorClass, message: String },
    /// The stream closed without a terminal callback
    Closed,
    /// Cancellation was requested and the engine did not finish within the grace period
    DrainTimedOut,
}

/// Map the end of the stream to an outcome and deliver it
pub(super) async fn finalize_session(
    ctx: &SessionContext,
    mut state: CallbackState,
    end: StreamEnd,
) {
    let cancelled = ctx.is_cancelled();

    let (outcome, title) = match end {
        StreamEnd::Completed(metadata) => {
            if let Some(path) = metadata.filepath {
                state.paths.record(path, HintOrigin::FinalMetadata);
            }
            let outcome = match state.paths.authoritative() {
                Some(resolved) => Outcome::Completed {
                    path: resolved.path.clone(),
                },
                None => Outcome::Failed {
                    kind: FailureKind::OutputPathUnknown,
                    message: unresolved_message(&state),
                },
            };
            (outcome, metadata.title)
        }
        StreamEnd::Error { .. } if cancelled => (Outcome::Cancelled, None),
        StreamEnd::Error { class, message } => {
            let kind = match class {
                ErrorClass::Transfer => FailureKind::NetworkTransfer,
                ErrorClass::Rejected => FailureKind::EngineInvocation,
            };
            (Outcome::Failed { kind, message }, None)
        }
        StreamEnd::Closed | StreamEnd::DrainTimedOut if cancelled => (Outcome::Cancelled, None),
        StreamEnd::Closed | StreamEnd::DrainTimedOut => (
            Outcome::Failed {
                kind: FailureKind::NetworkTransfer,
                message: "engine stopped without reporting an outcome".to_string(),
            },
            None,
        ),
    };

    if let Outcome::Completed { path } = &outcome {
        ctx.emit([SessionEvent::Log(format!(
            "[finished] saved to {}",
            path.display()
        ))])
        .await;
    }

    ctx.finish(outcome, title).await;
}

fn unresolved_message(state: &CallbackState) -> String {
    match state.paths.last_intermediate() {
        Some(path) => format!(
            "download finished but the output file could not be determined (last download target: {})",
            path.display()
        ),
        None => "download finished but the output file could not be determined".to_string(),
    }
}
