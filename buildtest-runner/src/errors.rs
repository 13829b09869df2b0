// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by buildtest-runner.

use crate::output::OutputFormat;
use camino::Utf8PathBuf;
use std::{env::JoinPathsError, io};
use thiserror::Error;

/// A malformed run-command template.
///
/// Surfaced when the build invocation's options are parsed, before any test
/// launches.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The template must contain exactly one `%s` substitution point.
    #[error(
        "run command template `{template}` must contain exactly one `%s` placeholder, found {count}"
    )]
    PlaceholderCount {
        /// The offending template.
        template: String,
        /// The number of placeholders found.
        count: usize,
    },

    /// The template splits to an empty argument vector.
    #[error("run command template `{template}` produces an empty command")]
    EmptyCommand {
        /// The offending template.
        template: String,
    },
}

/// A test subprocess that could not be spawned.
///
/// This is a genuine task failure, reported per-task; it does not abort
/// sibling tasks. It is distinct from a subprocess that runs and exits
/// nonzero, which is recorded data rather than an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// Spawning or waiting on the subprocess failed.
    #[error("failed to launch `{}` in `{cwd}`", .command.join(" "))]
    Spawn {
        /// The argument vector that was being launched.
        command: Vec<String>,
        /// The working directory of the launch.
        cwd: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// The execution environment could not be constructed.
    #[error("failed to build the execution environment")]
    Environment(#[from] EnvironmentError),
}

/// An error constructing the execution environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvironmentError {
    /// The library search paths could not be joined into one variable value.
    #[error("cannot join library search paths into `{var}`")]
    JoinPaths {
        /// The loader variable being assembled.
        var: &'static str,
        /// The underlying join error.
        #[source]
        error: JoinPathsError,
    },
}

/// An error reading or writing the run-stamp database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StampError {
    /// The stamp file could not be read.
    #[error("error reading stamp file `{path}`")]
    Read {
        /// The stamp file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// The stamp file could not be parsed.
    #[error("error parsing stamp file `{path}`")]
    Parse {
        /// The stamp file.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },

    /// The stamp file could not be written.
    #[error("error writing stamp file `{path}`")]
    Write {
        /// The stamp file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },
}

/// An error reading the test-binary manifest.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("error reading manifest `{path}`")]
    Read {
        /// The manifest file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// The manifest could not be parsed.
    #[error("error parsing manifest `{path}`")]
    Parse {
        /// The manifest file.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error writing list or result output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OutputWriteError {
    /// An error occurred while writing to the provided output.
    #[error("error writing to output")]
    Io(#[from] io::Error),

    /// An error occurred while serializing to JSON.
    #[error("error serializing to JSON")]
    Json(#[from] serde_json::Error),
}

/// Error returned while parsing an [`OutputFormat`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized output format: {input}\n(known formats: {})",
    OutputFormat::variants().join(", ")
)]
pub struct OutputFormatParseError {
    input: String,
}

impl OutputFormatParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
