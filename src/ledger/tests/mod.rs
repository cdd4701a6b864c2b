use super::*;
use crate::engine::testing::{ScriptedEngine, Step, completed, error, postprocess, progress};
use crate::error::{DownloadError, Error};
use crate::types::{AddOptions, FailureKind, TaskState};
use test_helpers::{
    BILIBILI_URL, YOUTUBE_URL, collect_until_finished, create_test_ledger, wait_for_event,
};
