//! Download sessions
//!
//! A session drives one task through one engine invocation. It waits for a
//! concurrency slot, invokes the [`Engine`](crate::engine::Engine), turns the
//! engine's callbacks into normalized [`SessionEvent`]s and delivers exactly
//! one terminal [`SessionEvent::Finished`] to its [`SessionEventSink`].
//!
//! ## Module layout
//!
//! - `context` - options, the sink trait, the cancel gate and [`SessionHandle`]
//! - `orchestration` - [`start`] and the session task
//! - `callbacks` - progress/postprocess/log callback handling
//! - `finalization` - mapping how the stream ended to an [`Outcome`](crate::types::Outcome)

mod callbacks;
mod context;
mod finalization;
mod orchestration;

pub use context::{SessionEvent, SessionEventSink, SessionHandle, SessionOptions};
pub use orchestration::start;

#[cfg(test)]
// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests;
