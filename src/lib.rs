//! # vidqueue
//!
//! Download orchestration core for a desktop video downloader (Bilibili,
//! YouTube, YouTube Music).
//!
//! ## Design Philosophy
//!
//! vidqueue is designed to be:
//! - **Library-first** - No CLI or UI; the GUI embeds the crate
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Engine-agnostic** - Extraction and transcoding happen in an external
//!   [`Engine`](engine::Engine); [`YtDlpEngine`] drives the `yt-dlp` tool
//!
//! The crate launches downloads, turns the engine's progress and
//! postprocessing callbacks into one monotonic progress signal, works out
//! which file the engine finally produced, and keeps a download history.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidqueue::{AddOptions, Config, Database, TaskLedger, YtDlpEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_create("vidqueue.json")?;
//!     let engine = Arc::new(YtDlpEngine::from_config(&config.tools)?);
//!     let store = Arc::new(Database::new(&config.persistence.database_path).await?);
//!
//!     let ledger = TaskLedger::new(config, engine, store);
//!     ledger.load_history().await?;
//!
//!     // Subscribe to events
//!     let mut events = ledger.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = ledger
//!         .add("https://www.youtube.com/watch?v=dQw4w9WgXcQ", AddOptions::default())
//!         .await?;
//!     ledger.start(task.id).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download history persistence
pub mod db;
/// Download engine contract and the yt-dlp adapter
pub mod engine;
/// Error types
pub mod error;
/// Task collection and session ownership
pub mod ledger;
/// Final output path resolution
pub mod output_path;
/// Platform detection from URLs
pub mod platform;
/// Progress normalization
pub mod progress;
/// Retry classification and backoff
pub mod retry;
/// Download sessions
pub mod session;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, DownloadRecord, RecordStore};
pub use engine::{Engine, YtDlpEngine};
pub use error::{DatabaseError, DownloadError, EngineError, Error, Result};
pub use ledger::TaskLedger;
pub use types::{
    AddOptions, DownloadTask, Event, FailureKind, Outcome, Platform, ProgressEvent, Stage,
    TaskId, TaskState,
};

/// Helper function to run the ledger with graceful signal handling.
///
/// Waits for a termination signal and then calls the ledger's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vidqueue::{Config, Database, TaskLedger, YtDlpEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let engine = Arc::new(YtDlpEngine::from_config(&config.tools)?);
///     let store = Arc::new(Database::new(&config.persistence.database_path).await?);
///     let ledger = TaskLedger::new(config, engine, store);
///
///     // Run with automatic signal handling
///     run_with_shutdown(ledger).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(ledger: TaskLedger) -> Result<()> {
    wait_for_signal().await;
    ledger.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
