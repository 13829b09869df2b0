// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line driver around the runner.
//!
//! The heavy lifting lives in the library; this module reads the manifest
//! and stamp database, wires up a [`BuildRunContext`], and prints what the
//! runner reports. Progress goes to stderr, results to stdout.

use crate::{
    binary_list::{binary_spec, BinaryList},
    context::{BuildRunContext, RunOptions},
    output::OutputFormat,
    results::ExecutionResult,
    runner::{RunEvent, RunStats, TestRunnerOpts},
    stamp::{runnable_status, RunStamps, RunnableStatus},
};
use anyhow::{bail, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Runs a build graph's compiled test binaries and records their results.
#[derive(Debug, Parser)]
#[command(name = "buildtest-runner", version)]
pub struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered test binaries and whether each is due to run
    List {
        #[command(flatten)]
        manifest_opts: ManifestOpts,

        /// Output format
        #[arg(short = 'T', long, default_value_t)]
        format: OutputFormat,
    },
    /// Run registered test binaries
    Run {
        #[command(flatten)]
        manifest_opts: ManifestOpts,

        #[command(flatten)]
        run_opts: RunOpts,

        #[command(flatten)]
        runner_opts: TestRunnerOpts,

        /// Output format for collected results
        #[arg(short = 'T', long, default_value_t)]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
struct ManifestOpts {
    /// Path to the test-binary manifest produced by the build
    #[arg(short = 'm', long)]
    manifest: Utf8PathBuf,

    /// Path to the run-stamp database
    #[arg(long, default_value = ".buildtest/stamps.json")]
    stamp_file: Utf8PathBuf,
}

#[derive(Args, Debug)]
struct RunOpts {
    /// Execute binaries even if their recorded inputs are unchanged
    #[arg(long)]
    run_always: bool,

    /// Command template wrapping each binary, e.g. 'valgrind %s'
    #[arg(long, value_name = "TEMPLATE")]
    runcmd: Option<String>,
}

impl RunOpts {
    fn to_options(&self) -> RunOptions {
        RunOptions {
            run_always: self.run_always,
            run_command: self.runcmd.clone(),
        }
    }
}

impl Opts {
    /// Executes the selected command.
    pub fn exec(self) -> Result<()> {
        match self.command {
            Command::List {
                manifest_opts,
                format,
            } => {
                let binary_list = BinaryList::from_path(&manifest_opts.manifest)?;
                let stamps = RunStamps::load(&manifest_opts.stamp_file)?;
                let statuses: Vec<RunnableStatus> = binary_list
                    .iter()
                    .map(|binary| runnable_status(binary, &stamps, false))
                    .collect();

                let mut stdout = StandardStream::stdout(ColorChoice::Auto);
                binary_list.write(format, &statuses, &mut stdout)?;
                Ok(())
            }
            Command::Run {
                manifest_opts,
                run_opts,
                runner_opts,
                format,
            } => {
                let binary_list = BinaryList::from_path(&manifest_opts.manifest)?;
                let stamps = RunStamps::load(&manifest_opts.stamp_file)?;
                let options = run_opts.to_options();
                let ctx = BuildRunContext::new(&options, binary_list.search_dirs(), stamps)?;
                let runner = runner_opts.build(&binary_list);

                let mut progress = StandardStream::stderr(ColorChoice::Auto);
                let stats = runner.execute(&ctx, |event| {
                    // Progress is best-effort; a broken stderr pipe doesn't
                    // abort the run.
                    let _ = write_event(&mut progress, &event);
                });

                let results = ctx.results().drain();
                ctx.into_stamps().save(&manifest_opts.stamp_file)?;

                let mut stdout = StandardStream::stdout(ColorChoice::Auto);
                match format {
                    OutputFormat::Plain => write_results_plain(&results, &mut stdout)?,
                    OutputFormat::Serializable(format) => {
                        let summary = RunSummary {
                            run_stats: stats,
                            results: &results,
                        };
                        format.to_writer(&summary, &mut stdout)?;
                    }
                }

                if !stats.is_success() {
                    bail!(
                        "{} of {} test binaries failed to launch",
                        stats.launch_failed,
                        stats.initial_run_count
                    );
                }
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunSummary<'a> {
    run_stats: RunStats,
    results: &'a [ExecutionResult],
}

fn write_event(writer: &mut impl WriteColor, event: &RunEvent<'_>) -> io::Result<()> {
    match event {
        RunEvent::RunStarted { binary_list } => {
            writeln!(writer, "running {} test binaries", binary_list.len())
        }
        RunEvent::TaskSkipped { binary } => {
            writeln!(writer, "       SKIP {} (up to date)", binary.binary)
        }
        RunEvent::TaskStarted { binary, reason } => {
            writeln!(writer, "        RUN {} ({})", binary.binary, reason)
        }
        RunEvent::TaskCompleted {
            binary,
            exit_code,
            time_taken,
        } => writeln!(
            writer,
            "   EXIT {:>3} {} ({:.3?})",
            exit_code, binary.binary, time_taken
        ),
        RunEvent::TaskLaunchFailed { binary, error, .. } => {
            writer.set_color(&launch_fail_spec())?;
            write!(writer, "LAUNCH FAIL")?;
            writer.reset()?;
            writeln!(writer, " {}: {}", binary.binary, error)
        }
        RunEvent::RunFinished {
            elapsed, run_stats, ..
        } => writeln!(
            writer,
            "finished in {:.3?}: {} completed, {} skipped, {} failed to launch",
            elapsed, run_stats.completed, run_stats.skipped, run_stats.launch_failed
        ),
    }
}

fn write_results_plain(
    results: &[ExecutionResult],
    writer: &mut impl WriteColor,
) -> io::Result<()> {
    let binary_spec = binary_spec();
    for result in results {
        writer.set_color(&binary_spec)?;
        write!(writer, "{}", result.binary)?;
        writer.reset()?;
        write!(writer, ": exit code ")?;
        writer.set_color(&exit_code_spec(result.exit_code))?;
        write!(writer, "{}", result.exit_code)?;
        writer.reset()?;
        writeln!(writer, " ({:.3?})", result.time_taken)?;
    }
    Ok(())
}

fn exit_code_spec(exit_code: i32) -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(if exit_code == 0 {
            Color::Green
        } else {
            Color::Red
        }))
        .set_bold(true);
    color_spec
}

fn launch_fail_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec.set_fg(Some(Color::Red)).set_bold(true);
    color_spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }
}
