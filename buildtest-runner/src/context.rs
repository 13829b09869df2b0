// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-invocation state shared by every execution task.

use crate::{
    binary_list::TestBinary,
    command::RunCommand,
    environment::ExecutionEnvironment,
    errors::{ConfigurationError, EnvironmentError},
    results::ResultSink,
    stamp::{runnable_status, RunStamps, RunnableStatus, TaskStamp},
};
use camino::Utf8PathBuf;
use once_cell::sync::OnceCell;
use std::sync::Mutex;

/// User-facing knobs for one build invocation.
///
/// Supplied once by the option parser at invocation start; immutable during
/// execution.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Execute every registered binary even if its recorded inputs are
    /// unchanged.
    pub run_always: bool,

    /// Optional command template wrapping each binary, e.g. `valgrind %s`.
    pub run_command: Option<String>,
}

/// State owned by one build invocation.
///
/// Holds the parsed run options, the lazily built execution environment,
/// the result sink, and the stamp database. Created when an invocation
/// starts and discarded when it ends; the stamps are the only piece that
/// outlives the run, via [`BuildRunContext::into_stamps`].
pub struct BuildRunContext {
    run_command: RunCommand,
    run_always: bool,
    search_dirs: Vec<Utf8PathBuf>,
    env: OnceCell<ExecutionEnvironment>,
    sink: ResultSink,
    stamps: Mutex<RunStamps>,
}

impl BuildRunContext {
    /// Creates the context for one invocation.
    ///
    /// A malformed run-command template is rejected here, before any test
    /// can launch.
    pub fn new(
        options: &RunOptions,
        search_dirs: Vec<Utf8PathBuf>,
        stamps: RunStamps,
    ) -> Result<Self, ConfigurationError> {
        let run_command = RunCommand::parse(options.run_command.as_deref())?;
        Ok(Self {
            run_command,
            run_always: options.run_always,
            search_dirs,
            env: OnceCell::new(),
            sink: ResultSink::new(),
            stamps: Mutex::new(stamps),
        })
    }

    /// The execution environment, built on first request and shared
    /// read-only by every task afterwards.
    ///
    /// Concurrent first requests build it exactly once. A failed build is
    /// not cached; the next request retries.
    pub fn execution_env(&self) -> Result<&ExecutionEnvironment, EnvironmentError> {
        self.env
            .get_or_try_init(|| ExecutionEnvironment::build(&self.search_dirs))
    }

    /// The parsed run-command template.
    pub fn run_command(&self) -> &RunCommand {
        &self.run_command
    }

    /// The result sink for this invocation.
    pub fn results(&self) -> &ResultSink {
        &self.sink
    }

    /// Decides whether a binary is due to run.
    pub fn runnable_status(&self, binary: &TestBinary) -> RunnableStatus {
        let stamps = self.stamps.lock().expect("stamp database lock poisoned");
        runnable_status(binary, &stamps, self.run_always)
    }

    /// Records a completed run's stamp.
    pub(crate) fn record_run(&self, binary: &TestBinary) {
        // Fingerprinting can fail if the binary vanished mid-run; leave the
        // stamp unrecorded so the task stays due next time.
        if let Ok(stamp) = TaskStamp::of_binary(binary) {
            self.stamps
                .lock()
                .expect("stamp database lock poisoned")
                .record(binary.binary.clone(), stamp);
        }
    }

    /// Hands back the stamp database for persistence at invocation end.
    pub fn into_stamps(self) -> RunStamps {
        self.stamps
            .into_inner()
            .expect("stamp database lock poisoned")
    }
}
