use super::*;
use crate::config::Config;
use crate::engine::Engine;
use crate::engine::testing::{
    PanickingEngine, ScriptedEngine, Step, completed, error, log, postprocess, progress,
};
use crate::error::{DownloadError, Error};
use crate::types::{DownloadTask, FailureKind, Outcome, Platform, Stage, TaskId, TaskState};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(TaskId, SessionEvent)>>,
    finished: Notify,
}

impl RecordingSink {
    fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn finished_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Finished { .. }))
            .count()
    }

    async fn wait_finished(&self) -> (Outcome, Option<String>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.finished.notified();
                let found = self.events().into_iter().find_map(|e| match e {
                    SessionEvent::Finished { outcome, title } => Some((outcome, title)),
                    _ => None,
                });
                if let Some(found) = found {
                    return found;
                }
                notified.await;
            }
        })
        .await
        .expect("session did not finish in time")
    }

    async fn wait_for(&self, predicate: impl Fn(&SessionEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.events().iter().any(&predicate) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event did not arrive in time");
    }
}

#[async_trait::async_trait]
impl SessionEventSink for RecordingSink {
    async fn on_event(&self, id: TaskId, event: SessionEvent) {
        let is_finished = matches!(event, SessionEvent::Finished { .. });
        self.events.lock().unwrap().push((id, event));
        if is_finished {
            self.finished.notify_waiters();
        }
    }
}

struct Harness {
    _dir: TempDir,
    destination: PathBuf,
    sink: Arc<RecordingSink>,
    limiter: Arc<Semaphore>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out");
        Self {
            _dir: dir,
            destination,
            sink: Arc::new(RecordingSink::default()),
            limiter: Arc::new(Semaphore::new(2)),
        }
    }

    fn task(&self) -> DownloadTask {
        DownloadTask::new(
            TaskId(1),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            self.destination.clone(),
            false,
            Platform::YouTube,
        )
    }

    fn options(&self, destination: &Path) -> Arc<SessionOptions> {
        let mut options = SessionOptions::from_config(
            &Config::default(),
            destination.to_path_buf(),
            false,
        );
        options.cancel_grace = Duration::from_millis(200);
        Arc::new(options)
    }

    async fn start(&self, engine: Arc<dyn Engine>) -> SessionHandle {
        start(
            &self.task(),
            self.options(&self.destination),
            engine,
            self.sink.clone(),
            self.limiter.clone(),
        )
        .await
        .unwrap()
    }
}

fn percents(events: &[SessionEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn completes_with_postprocessed_path() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(0, 1000, "/out/clip.f137.mp4"),
        progress(500, 1000, "/out/clip.f137.mp4"),
        progress(1000, 1000, "/out/clip.f137.mp4"),
        postprocess("Merger", Some("/out/clip.mp4")),
        completed(Some("/out/clip.f137.mp4")),
    ]));

    let handle = h.start(engine.clone()).await;
    let (outcome, title) = h.sink.wait_finished().await;
    handle.wait().await;

    assert_eq!(
        outcome,
        Outcome::Completed {
            path: PathBuf::from("/out/clip.mp4")
        }
    );
    assert_eq!(title.as_deref(), Some("Test Video"));
    assert_eq!(engine.invocations(), 1);
    assert_eq!(engine.requests()[0].destination, h.destination);

    let events = h.sink.events();
    assert_eq!(events[0], SessionEvent::Started);
    assert_eq!(percents(&events), vec![0, 50, 100, 100]);
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Log(line) if line == "[finished] saved to /out/clip.mp4")
    ));
    assert!(handle.is_finished());
}

#[tokio::test]
async fn uses_metadata_path_without_postprocessing() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(10, 10, "/out/song.webm"),
        completed(Some("/out/song.webm")),
    ]));

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(outcome.path(), Some(&PathBuf::from("/out/song.webm")));
}

#[tokio::test]
async fn intermediate_only_path_is_unknown() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(10, 10, "/out/song.webm"),
        completed(None),
    ]));

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    match outcome {
        Outcome::Failed { kind, message } => {
            assert_eq!(kind, FailureKind::OutputPathUnknown);
            assert!(message.contains("/out/song.webm"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn engine_error_is_network_failure() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(100, 1000, "/out/clip.mp4"),
        error("ERROR: unable to download video data: HTTP Error 403"),
    ]));

    h.start(engine).await;
    let (outcome, title) = h.sink.wait_finished().await;

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::NetworkTransfer,
            message: "ERROR: unable to download video data: HTTP Error 403".to_string(),
        }
    );
    assert_eq!(title, None);
}

#[tokio::test]
async fn network_unreachable_fails_without_a_path() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(10, 1000, "/out/clip.f137.mp4"),
        postprocess("Merger", None),
        error("network unreachable"),
    ]));

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::NetworkTransfer,
            message: "network unreachable".to_string(),
        }
    );
    assert_eq!(outcome.path(), None);
    assert!(!h.sink.events().iter().any(
        |e| matches!(e, SessionEvent::Log(line) if line.starts_with("[finished]"))
    ));
}

#[tokio::test]
async fn unavailable_video_is_invocation_failure() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![error(
        "ERROR: [youtube] dQw4w9WgXcQ: Video unavailable. This video is private",
    )]));

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::EngineInvocation));
    assert_eq!(h.sink.events()[0], SessionEvent::Started);
}

#[tokio::test]
async fn invoke_error_is_invocation_failure() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_rejection("unsupported URL");

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::EngineInvocation));
    // Started is only emitted once the engine runs
    assert!(!h.sink.events().contains(&SessionEvent::Started));
}

#[tokio::test]
async fn stream_closing_early_is_network_failure() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![progress(
        1,
        10,
        "/out/clip.mp4",
    )]));

    h.start(engine).await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::NetworkTransfer));
}

#[tokio::test]
async fn cancel_while_waiting_for_slot_skips_engine() {
    let mut h = Harness::new();
    h.limiter = Arc::new(Semaphore::new(0));
    let engine = Arc::new(ScriptedEngine::with_script(vec![completed(Some(
        "/out/clip.mp4",
    ))]));

    let handle = h.start(engine.clone()).await;
    assert!(handle.cancel().await);
    let (outcome, _) = h.sink.wait_finished().await;
    handle.wait().await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(engine.invocations(), 0);
    assert_eq!(h.sink.events().len(), 1);
}

#[tokio::test]
async fn no_progress_after_cancel() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(1, 10, "/out/clip.mp4"),
        Step::WaitForCancel,
        progress(5, 10, "/out/clip.mp4"),
        log("still going"),
    ]));

    let handle = h.start(engine).await;
    h.sink
        .wait_for(|e| matches!(e, SessionEvent::Progress(_)))
        .await;

    assert!(handle.cancel().await);
    let seen_at_cancel = h.sink.events().len();
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(outcome, Outcome::Cancelled);
    let after: Vec<_> = h.sink.events().split_off(seen_at_cancel);
    assert_eq!(after.len(), 1, "only the terminal event follows cancel: {after:?}");
    assert!(matches!(after[0], SessionEvent::Finished { .. }));
}

#[tokio::test]
async fn completion_while_draining_wins() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(9, 10, "/out/clip.f137.mp4"),
        Step::WaitForCancel,
        postprocess("Merger", Some("/out/clip.mp4")),
        completed(Some("/out/clip.mp4")),
    ]));

    let handle = h.start(engine).await;
    h.sink
        .wait_for(|e| matches!(e, SessionEvent::Progress(_)))
        .await;
    handle.cancel().await;
    let (outcome, _) = h.sink.wait_finished().await;

    assert_eq!(
        outcome,
        Outcome::Completed {
            path: PathBuf::from("/out/clip.mp4")
        }
    );
}

#[tokio::test]
async fn drain_timeout_reports_cancelled() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(1, 10, "/out/clip.mp4"),
        Step::Hang,
    ]));

    let handle = h.start(engine).await;
    h.sink
        .wait_for(|e| matches!(e, SessionEvent::Progress(_)))
        .await;
    handle.cancel().await;
    let (outcome, _) = h.sink.wait_finished().await;
    handle.wait().await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(h.sink.finished_count(), 1);
}

#[tokio::test]
async fn panic_in_engine_is_internal_failure() {
    let h = Harness::new();

    let handle = h.start(Arc::new(PanickingEngine)).await;
    let (outcome, _) = h.sink.wait_finished().await;
    handle.wait().await;

    match outcome {
        Outcome::Failed { kind, message } => {
            assert_eq!(kind, FailureKind::Internal);
            assert!(message.contains("engine exploded"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.sink.finished_count(), 1);
}

#[tokio::test]
async fn rejects_task_that_is_not_queued() {
    let h = Harness::new();
    let mut task = h.task();
    task.state = TaskState::Completed;

    let err = start(
        &task,
        h.options(&h.destination),
        Arc::new(ScriptedEngine::new()),
        h.sink.clone(),
        h.limiter.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Download(DownloadError::InvalidState {
            current_state: TaskState::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn creates_output_directory() {
    let h = Harness::new();
    assert!(!h.destination.exists());

    h.start(Arc::new(ScriptedEngine::with_script(vec![completed(Some(
        "/out/clip.mp4",
    ))])))
    .await;
    h.sink.wait_finished().await;

    assert!(h.destination.is_dir());
}

#[tokio::test]
async fn uncreatable_output_directory_is_an_error() {
    let h = Harness::new();
    let blocker = h._dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let destination = blocker.join("out");

    let err = start(
        &h.task(),
        h.options(&destination),
        Arc::new(ScriptedEngine::new()),
        h.sink.clone(),
        h.limiter.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Download(DownloadError::OutputDirectory { .. })
    ));
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn cancel_after_finish_is_a_no_op() {
    let h = Harness::new();
    let handle = h
        .start(Arc::new(ScriptedEngine::with_script(vec![completed(Some(
            "/out/clip.mp4",
        ))])))
        .await;
    h.sink.wait_finished().await;
    handle.wait().await;

    assert!(!handle.cancel().await);
    assert_eq!(h.sink.finished_count(), 1);
}

#[tokio::test]
async fn second_cancel_returns_false() {
    let h = Harness::new();
    let handle = h
        .start(Arc::new(ScriptedEngine::with_script(vec![
            Step::WaitForCancel,
        ])))
        .await;

    assert!(handle.cancel().await);
    assert!(!handle.cancel().await);
    h.sink.wait_finished().await;
    handle.wait().await;
    assert_eq!(h.sink.finished_count(), 1);
}

#[tokio::test]
async fn percentages_never_decrease() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        progress(600, 1000, "/out/clip.f137.mp4"),
        // audio stream starts over at zero
        progress(100, 1000, "/out/clip.f140.m4a"),
        progress(800, 1000, "/out/clip.f140.m4a"),
        postprocess("Merger", None),
        postprocess("Merger", Some("/out/clip.mp4")),
        completed(None),
    ]));

    h.start(engine).await;
    h.sink.wait_finished().await;
    let events = h.sink.events();

    let values = percents(&events);
    assert_eq!(values, vec![60, 60, 80, 80, 80]);
    assert!(values.windows(2).all(|w| w[0] <= w[1]));

    // each log line carries the value of the progress event that follows it
    for pair in events.windows(2) {
        if let (SessionEvent::Log(line), SessionEvent::Progress(p)) = (&pair[0], &pair[1])
            && p.stage == Stage::Downloading
        {
            assert!(line.contains(&format!("{}%", p.percent)), "{line}");
        }
    }
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::Log(line) if line == "[Merger] running"))
    );
}

#[tokio::test]
async fn progress_without_total_is_not_emitted() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::with_script(vec![
        Step::Emit(crate::engine::EngineCallback::Progress(
            crate::progress::RawProgress {
                downloaded_bytes: Some(100),
                filename: Some("/out/clip.mp4".to_string()),
                ..Default::default()
            },
        )),
        completed(Some("/out/clip.mp4")),
    ]));

    h.start(engine).await;
    h.sink.wait_finished().await;

    assert!(percents(&h.sink.events()).is_empty());
}
