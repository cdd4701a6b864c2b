//! Scripted engines for tests

use super::{CallbackStream, Engine, EngineCallback, EngineMetadata, EngineRequest};
use crate::error::EngineError;
use crate::progress::RawProgress;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// One step of a scripted engine run
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Send a callback
    Emit(EngineCallback),
    /// Pause before the next step
    Sleep(Duration),
    /// Block until the engine is cancelled, then continue with the next step
    WaitForCancel,
    /// Block until cancelled, then keep the stream open without ending it
    Hang,
}

/// Engine that replays one script per invocation
///
/// Each invocation pops the next script. `Err` scripts make `invoke` fail;
/// an exhausted queue is reported as a rejection.
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    scripts: Mutex<VecDeque<Result<Vec<Step>, String>>>,
    invocations: AtomicUsize,
    requests: Mutex<Vec<EngineRequest>>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Engine whose first invocation runs `steps`
    pub(crate) fn with_script(steps: Vec<Step>) -> Self {
        let engine = Self::new();
        engine.push(steps);
        engine
    }

    pub(crate) fn push(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(Ok(steps));
    }

    pub(crate) fn push_rejection(&self, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        request: EngineRequest,
        cancel: CancellationToken,
    ) -> Result<CallbackStream, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no script left".to_string()))
            .map_err(EngineError::Rejected)?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Emit(callback) => {
                        if tx.send(callback).await.is_err() {
                            return;
                        }
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::WaitForCancel => cancel.cancelled().await,
                    Step::Hang => {
                        cancel.cancelled().await;
                        tx.closed().await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Engine that panics inside `invoke`
pub(crate) struct PanickingEngine;

#[async_trait]
impl Engine for PanickingEngine {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn invoke(
        &self,
        _request: EngineRequest,
        _cancel: CancellationToken,
    ) -> Result<CallbackStream, EngineError> {
        panic!("engine exploded");
    }
}

pub(crate) fn progress(downloaded: u64, total: u64, filename: &str) -> Step {
    Step::Emit(EngineCallback::Progress(RawProgress {
        downloaded_bytes: Some(downloaded),
        total_bytes: Some(total),
        filename: Some(filename.to_string()),
        speed: Some(1024.0),
        eta: Some(3.0),
        ..Default::default()
    }))
}

pub(crate) fn postprocess(stage: &str, destination: Option<&str>) -> Step {
    Step::Emit(EngineCallback::Postprocess {
        stage: stage.to_string(),
        destination: destination.map(PathBuf::from),
    })
}

pub(crate) fn completed(filepath: Option<&str>) -> Step {
    Step::Emit(EngineCallback::Completed(EngineMetadata {
        title: Some("Test Video".to_string()),
        filepath: filepath.map(PathBuf::from),
    }))
}

/// Error callback classified the way yt-dlp output is
pub(crate) fn error(message: &str) -> Step {
    Step::Emit(EngineCallback::Error {
        class: crate::engine::ytdlp::classify_error(message),
        message: message.to_string(),
    })
}

pub(crate) fn log(line: &str) -> Step {
    Step::Emit(EngineCallback::Log(line.to_string()))
}
