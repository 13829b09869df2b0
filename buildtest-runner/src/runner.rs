// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parallel execution of registered test binaries.
//!
//! Each binary that is due to run gets its own worker thread and its own OS
//! process. The worker blocks for the subprocess's full duration: test
//! execution is isolated in its own process, so a blocked worker maps
//! directly to wall-clock test time. No timeout is enforced; a hung binary
//! blocks its worker indefinitely.

use crate::{
    binary_list::{BinaryList, TestBinary},
    context::BuildRunContext,
    errors::LaunchError,
    results::ExecutionResult,
    stamp::{ReadyReason, RunnableStatus},
};
use camino::Utf8Path;
use clap::Args;
use duct::cmd;
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::{
    convert::Infallible,
    marker::PhantomData,
    path::Path,
    process::ExitStatus,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant, SystemTime},
};

/// Test runner options.
#[derive(Args, Debug, Default)]
pub struct TestRunnerOpts {
    /// Number of tests to run simultaneously [default: logical CPU count]
    #[arg(short = 'j', long, alias = "test-threads")]
    pub jobs: Option<usize>,
}

impl TestRunnerOpts {
    /// Creates a new test runner over the registered binaries.
    pub fn build<'list>(&self, binary_list: &'list BinaryList) -> TestRunner<'list> {
        let jobs = self.jobs.unwrap_or_else(num_cpus::get);
        TestRunner {
            binary_list,
            run_pool: ThreadPoolBuilder::new()
                // The scope driver needs its own thread beside the workers.
                .num_threads(jobs + 1)
                .thread_name(|idx| format!("buildtest-run-{}", idx))
                .build()
                .expect("run pool built"),
        }
    }
}

/// Drives one execution task per registered binary on a worker pool.
pub struct TestRunner<'list> {
    binary_list: &'list BinaryList,
    run_pool: ThreadPool,
}

impl<'list> TestRunner<'list> {
    /// Executes the registered binaries, each one in its own process.
    ///
    /// The callback is called with the lifecycle events of each task.
    pub fn execute<F>(&self, ctx: &BuildRunContext, mut callback: F) -> RunStats
    where
        F: FnMut(RunEvent<'list>) + Send,
    {
        self.try_execute::<Infallible, _>(ctx, |event| {
            callback(event);
            Ok(())
        })
        .expect("Err branch is infallible")
    }

    /// Executes the registered binaries, each one in its own process.
    ///
    /// If the callback returns an error, no further tasks are launched;
    /// subprocesses already in flight run to completion and their events are
    /// still drained. The first error is propagated.
    pub fn try_execute<E, F>(&self, ctx: &BuildRunContext, callback: F) -> Result<RunStats, E>
    where
        F: FnMut(RunEvent<'list>) -> Result<(), E> + Send,
        E: Send,
    {
        let (run_sender, run_receiver) = crossbeam_channel::unbounded();

        let canceled = AtomicBool::new(false);
        let canceled_ref = &canceled;

        let mut cb_ctx = CallbackContext::new(callback, self.binary_list.len());

        // Send the initial event. (The cancellation flag doesn't need to be
        // set if this fails because nothing has been launched yet.)
        cb_ctx.run_started(self.binary_list)?;

        // Stores the first error that occurred. This error is propagated up.
        let mut first_error = None;

        let cb_ctx_mut = &mut cb_ctx;
        let first_error_mut = &mut first_error;

        self.run_pool.scope(move |run_scope| {
            for binary in self.binary_list.iter() {
                if canceled_ref.load(Ordering::Acquire) {
                    break;
                }

                let this_sender = run_sender.clone();
                run_scope.spawn(move |_| {
                    if canceled_ref.load(Ordering::Acquire) {
                        return;
                    }

                    let task = ExecutionTask::new(binary);
                    let reason = match task.runnable_status(ctx) {
                        RunnableStatus::Skip => {
                            // Failure to send means the receiver was dropped.
                            let _ = this_sender.send(InternalEvent::Skipped { binary });
                            return;
                        }
                        RunnableStatus::Ready(reason) => reason,
                    };

                    // Failure to send means the receiver was dropped.
                    let _ = this_sender.send(InternalEvent::Started { binary, reason });

                    let status = task.run(ctx);
                    let _ = this_sender.send(InternalEvent::Finished { binary, status });
                });
            }

            drop(run_sender);

            for event in run_receiver {
                match cb_ctx_mut.handle_event(event) {
                    Ok(()) => {}
                    Err(err) => {
                        // Stop launching queued tasks; keep draining events
                        // so the stats stay consistent with what actually ran.
                        canceled_ref.store(true, Ordering::Release);
                        if first_error_mut.is_none() {
                            *first_error_mut = Some(err);
                        }
                    }
                }
            }
        });

        match cb_ctx.run_finished() {
            Ok(()) => {}
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            None => Ok(cb_ctx.run_stats),
            Some(err) => Err(err),
        }
    }
}

/// One test binary's run: the rerun decision, the subprocess launch with
/// captured output, and result bookkeeping.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionTask<'a> {
    binary: &'a TestBinary,
}

impl<'a> ExecutionTask<'a> {
    /// Creates the task for one registered binary.
    pub fn new(binary: &'a TestBinary) -> Self {
        Self { binary }
    }

    /// Whether this task must execute, and why.
    pub fn runnable_status(&self, ctx: &BuildRunContext) -> RunnableStatus {
        ctx.runnable_status(self.binary)
    }

    /// Decides, runs, and reports: the scheduler-facing entry point.
    pub fn execute(&self, ctx: &BuildRunContext) -> ExecutionStatus {
        match self.runnable_status(ctx) {
            RunnableStatus::Skip => ExecutionStatus::Skipped,
            RunnableStatus::Ready(_) => self.run(ctx),
        }
    }

    /// Runs the subprocess to completion, appending an [`ExecutionResult`]
    /// to the sink when it exits.
    ///
    /// The exit code is recorded data, whatever it is; only a subprocess
    /// that cannot be spawned fails the task. The calling worker blocks for
    /// the subprocess's full duration.
    pub fn run(&self, ctx: &BuildRunContext) -> ExecutionStatus {
        let stopwatch = Stopwatch::now();
        let command = ctx.run_command().command_for(&self.binary.binary);
        let cwd = self.binary.working_dir();

        let output = match spawn_and_wait(ctx, &command, cwd) {
            Ok(output) => output,
            Err(error) => {
                let (_, time_taken) = stopwatch.end();
                return ExecutionStatus::FailedToLaunch { error, time_taken };
            }
        };

        let (start_time, time_taken) = stopwatch.end();
        let exit_code = exit_code(output.status);

        ctx.results().append(ExecutionResult {
            binary: self.binary.binary.clone(),
            command,
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            start_time,
            time_taken,
        });
        ctx.record_run(self.binary);

        ExecutionStatus::Completed {
            exit_code,
            time_taken,
        }
    }
}

fn spawn_and_wait(
    ctx: &BuildRunContext,
    command: &[String],
    cwd: &Utf8Path,
) -> Result<std::process::Output, LaunchError> {
    let env = ctx.execution_env()?;
    let (program, args) = command
        .split_first()
        .expect("formatted command is never empty");

    debug!("running {:?} in {}", command, cwd);

    let expression = cmd(Path::new(program.as_str()), args)
        // Capture stdout and stderr separately; nothing is streamed to the
        // console while the test runs.
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .dir(cwd.as_std_path())
        .full_env(env.iter().map(|(var, value)| (var.to_owned(), value.to_owned())));

    let spawn_err = |error| LaunchError::Spawn {
        command: command.to_vec(),
        cwd: cwd.to_owned(),
        error,
    };

    let handle = expression.start().map_err(spawn_err)?;
    handle.into_output().map_err(spawn_err)
}

/// Maps an exit status to the integer recorded in results. Signal deaths on
/// Unix use the shell convention of `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Terminal state of one execution task.
#[derive(Debug)]
pub enum ExecutionStatus {
    /// The recorded inputs were unchanged; nothing ran and no result was
    /// produced. A skip is not a failure.
    Skipped,

    /// The subprocess ran to completion. The exit code is recorded data for
    /// the reporting layer, not a verdict.
    Completed {
        /// The recorded exit code.
        exit_code: i32,
        /// Wall-clock duration of the subprocess.
        time_taken: Duration,
    },

    /// The subprocess could not be spawned. A genuine task failure.
    FailedToLaunch {
        /// What went wrong.
        error: LaunchError,
        /// Time spent before the launch was abandoned.
        time_taken: Duration,
    },
}

/// Lifecycle events delivered to the caller's callback during a run.
#[derive(Debug)]
pub enum RunEvent<'list> {
    /// The run is starting.
    RunStarted {
        /// The registry being executed.
        binary_list: &'list BinaryList,
    },

    /// A task's recorded inputs were unchanged; it will not run.
    TaskSkipped {
        /// The binary that was skipped.
        binary: &'list TestBinary,
    },

    /// A task is about to launch its subprocess.
    TaskStarted {
        /// The binary being launched.
        binary: &'list TestBinary,
        /// Why the task is due to run.
        reason: ReadyReason,
    },

    /// A task's subprocess ran to completion, with any exit code.
    TaskCompleted {
        /// The binary that ran.
        binary: &'list TestBinary,
        /// The recorded exit code.
        exit_code: i32,
        /// Wall-clock duration of the subprocess.
        time_taken: Duration,
    },

    /// A task's subprocess could not be spawned.
    TaskLaunchFailed {
        /// The binary that failed to launch.
        binary: &'list TestBinary,
        /// What went wrong.
        error: LaunchError,
        /// Time spent before the launch was abandoned.
        time_taken: Duration,
    },

    /// Every task has finished or been skipped.
    RunFinished {
        /// When the run began.
        start_time: SystemTime,
        /// Wall-clock duration of the whole run.
        elapsed: Duration,
        /// Final accounting.
        run_stats: RunStats,
    },
}

/// Statistics for a test run.
#[derive(Copy, Clone, Debug, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunStats {
    /// The number of registered binaries when the run began.
    pub initial_run_count: usize,

    /// The number of tasks that reached a terminal state other than skip.
    pub final_run_count: usize,

    /// Tasks whose subprocess ran to completion, regardless of exit code.
    pub completed: usize,

    /// Tasks whose subprocess could not be spawned.
    pub launch_failed: usize,

    /// Tasks skipped because their recorded inputs were unchanged.
    pub skipped: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is marked failed if any task failed to launch, or if tasks were
    /// abandoned before reaching a terminal state. Exit codes do not
    /// participate: a test that ran and exited nonzero is a completed
    /// observation for the reporting layer to judge.
    pub fn is_success(&self) -> bool {
        if self.final_run_count + self.skipped < self.initial_run_count {
            return false;
        }
        self.launch_failed == 0
    }
}

struct CallbackContext<F, E> {
    callback: F,
    stopwatch: Stopwatch,
    run_stats: RunStats,
    phantom: PhantomData<E>,
}

impl<'list, F, E> CallbackContext<F, E>
where
    F: FnMut(RunEvent<'list>) -> Result<(), E> + Send,
{
    fn new(callback: F, initial_run_count: usize) -> Self {
        Self {
            callback,
            stopwatch: Stopwatch::now(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            phantom: PhantomData,
        }
    }

    fn run_started(&mut self, binary_list: &'list BinaryList) -> Result<(), E> {
        (self.callback)(RunEvent::RunStarted { binary_list })
    }

    fn handle_event(&mut self, event: InternalEvent<'list>) -> Result<(), E> {
        match event {
            InternalEvent::Skipped { binary } => {
                self.run_stats.skipped += 1;
                (self.callback)(RunEvent::TaskSkipped { binary })
            }
            InternalEvent::Started { binary, reason } => {
                (self.callback)(RunEvent::TaskStarted { binary, reason })
            }
            InternalEvent::Finished { binary, status } => {
                self.run_stats.final_run_count += 1;
                match status {
                    ExecutionStatus::Completed {
                        exit_code,
                        time_taken,
                    } => {
                        self.run_stats.completed += 1;
                        (self.callback)(RunEvent::TaskCompleted {
                            binary,
                            exit_code,
                            time_taken,
                        })
                    }
                    ExecutionStatus::FailedToLaunch { error, time_taken } => {
                        self.run_stats.launch_failed += 1;
                        (self.callback)(RunEvent::TaskLaunchFailed {
                            binary,
                            error,
                            time_taken,
                        })
                    }
                    // The runner only reports finished tasks that ran.
                    ExecutionStatus::Skipped => unreachable!("skips are reported before launch"),
                }
            }
        }
    }

    fn run_finished(&mut self) -> Result<(), E> {
        let (start_time, elapsed) = self.stopwatch.end();
        (self.callback)(RunEvent::RunFinished {
            start_time,
            elapsed,
            run_stats: self.run_stats,
        })
    }
}

enum InternalEvent<'list> {
    Skipped {
        binary: &'list TestBinary,
    },
    Started {
        binary: &'list TestBinary,
        reason: ReadyReason,
    },
    Finished {
        binary: &'list TestBinary,
        status: ExecutionStatus,
    },
}

/// Pairs a realtime start timestamp with a monotonic duration measurement.
struct Stopwatch {
    start_time: SystemTime,
    instant: Instant,
}

impl Stopwatch {
    fn now() -> Self {
        Self {
            start_time: SystemTime::now(),
            instant: Instant::now(),
        }
    }

    fn end(&self) -> (SystemTime, Duration) {
        (self.start_time, self.instant.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(RunStats::default().is_success(), "empty run => success");
        assert!(
            RunStats {
                initial_run_count: 42,
                final_run_count: 40,
                completed: 40,
                skipped: 2,
                ..RunStats::default()
            }
            .is_success(),
            "all tasks terminal => success"
        );
        assert!(
            !RunStats {
                initial_run_count: 42,
                final_run_count: 41,
                completed: 41,
                ..RunStats::default()
            }
            .is_success(),
            "abandoned task => failure"
        );
        assert!(
            !RunStats {
                initial_run_count: 42,
                final_run_count: 42,
                completed: 41,
                launch_failed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "launch failure => failure"
        );
        assert!(
            RunStats {
                initial_run_count: 1,
                final_run_count: 1,
                completed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "nonzero exit codes are not failures at this layer"
        );
    }

    #[test]
    fn exit_code_passes_through_plain_codes() {
        // A zero status is the one ExitStatus that's easy to construct
        // portably.
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
            // Raw wait status 0x0003 encodes death by signal 3 (SIGQUIT).
            assert_eq!(exit_code(ExitStatus::from_raw(3)), 128 + 3);
            // Raw wait status 0x0300 encodes exit code 3.
            assert_eq!(exit_code(ExitStatus::from_raw(0x0300)), 3);
        }
    }
}
