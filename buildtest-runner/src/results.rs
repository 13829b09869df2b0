// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregation of completed test executions.

use camino::Utf8PathBuf;
use log::debug;
use serde::{Serialize, Serializer};
use std::{
    borrow::Cow,
    sync::Mutex,
    time::{Duration, SystemTime},
};

/// The record of one completed test execution.
///
/// Created exactly once per task whose subprocess ran to completion, and
/// never mutated after being appended to the [`ResultSink`]. A nonzero exit
/// code lives here as data for the reporting layer; it is not a failure of
/// the execution layer.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionResult {
    /// The test binary this result belongs to.
    pub binary: Utf8PathBuf,

    /// The argument vector the subprocess was launched with.
    pub command: Vec<String>,

    /// The subprocess exit code. On Unix, signal deaths are recorded as
    /// `128 + signal`.
    pub exit_code: i32,

    /// Captured standard output.
    #[serde(serialize_with = "serialize_bytes_lossy")]
    pub stdout: Vec<u8>,

    /// Captured standard error. Kept separate from stdout, never merged.
    #[serde(serialize_with = "serialize_bytes_lossy")]
    pub stderr: Vec<u8>,

    /// When the subprocess was spawned.
    pub start_time: SystemTime,

    /// Wall-clock duration of the subprocess.
    pub time_taken: Duration,
}

impl ExecutionResult {
    /// The captured standard output as text.
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// The captured standard error as text.
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

fn serialize_bytes_lossy<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// The aggregation point for completed executions within one build run.
///
/// Appended to concurrently by worker threads; entries appear in completion
/// order, which is nondeterministic across runs. Protected by a single
/// coarse lock held only for the duration of each append, never across a
/// subprocess.
#[derive(Debug, Default)]
pub struct ResultSink {
    results: Mutex<Vec<ExecutionResult>>,
}

impl ResultSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a completed result. Thread-safe.
    pub fn append(&self, result: ExecutionResult) {
        debug!(
            "recording result for {} (exit code {})",
            result.binary, result.exit_code
        );
        self.results
            .lock()
            .expect("result sink lock poisoned")
            .push(result);
    }

    /// Returns the number of results recorded so far.
    pub fn len(&self) -> usize {
        self.results.lock().expect("result sink lock poisoned").len()
    }

    /// Returns true if no results have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all results in completion order and leaves the sink empty.
    ///
    /// Call only after the runner has returned, so that no task can still be
    /// appending.
    pub fn drain(&self) -> Vec<ExecutionResult> {
        std::mem::take(&mut *self.results.lock().expect("result sink lock poisoned"))
    }
}
