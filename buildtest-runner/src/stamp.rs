// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run stamps: the recorded inputs of each binary's last run.
//!
//! A test binary is only worth rerunning when something it depends on has
//! changed. After every completed run the binary and its declared
//! dependencies are fingerprinted (size and mtime) and recorded; the next
//! invocation compares the recorded stamp against the files on disk to
//! decide whether the task runs or is skipped.

use crate::{binary_list::TestBinary, errors::StampError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, io, time::SystemTime};

/// Size and mtime of one file: the unit of change detection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Fingerprint {
    /// File size in bytes.
    pub size: u64,

    /// Last modification time.
    pub mtime: SystemTime,
}

impl Fingerprint {
    /// Reads the fingerprint of a file on disk.
    pub fn of_file(path: &Utf8Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            mtime: metadata.modified()?,
        })
    }
}

/// The recorded inputs of one task's last run: the binary itself and every
/// declared dependency.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TaskStamp {
    files: BTreeMap<Utf8PathBuf, Fingerprint>,
}

impl TaskStamp {
    /// Fingerprints the binary and its declared dependencies as they are on
    /// disk right now.
    pub fn of_binary(binary: &TestBinary) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        files.insert(binary.binary.clone(), Fingerprint::of_file(&binary.binary)?);
        for dep in &binary.deps {
            files.insert(dep.clone(), Fingerprint::of_file(dep)?);
        }
        Ok(Self { files })
    }
}

/// The database of last-run stamps, keyed by binary path.
///
/// Persisted between build invocations; a missing file is an empty database.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RunStamps {
    stamps: BTreeMap<Utf8PathBuf, TaskStamp>,
}

impl RunStamps {
    /// Loads the database from disk.
    pub fn load(path: &Utf8Path) -> Result<Self, StampError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => {
                return Err(StampError::Read {
                    path: path.to_owned(),
                    error,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|error| StampError::Parse {
            path: path.to_owned(),
            error,
        })
    }

    /// Writes the database, creating parent directories as needed.
    pub fn save(&self, path: &Utf8Path) -> Result<(), StampError> {
        let write_err = |error| StampError::Write {
            path: path.to_owned(),
            error,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(self).expect("stamps serialize to JSON");
        fs::write(path, json).map_err(write_err)
    }

    /// Records a fresh stamp for a binary after a completed run.
    pub fn record(&mut self, binary: Utf8PathBuf, stamp: TaskStamp) {
        self.stamps.insert(binary, stamp);
    }

    /// Returns the recorded stamp for a binary, if any.
    pub fn get(&self, binary: &Utf8Path) -> Option<&TaskStamp> {
        self.stamps.get(binary)
    }
}

/// Whether a task must run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunnableStatus {
    /// The task must execute.
    Ready(ReadyReason),

    /// The recorded inputs are unchanged; the task does not execute and
    /// produces no result.
    Skip,
}

impl RunnableStatus {
    /// Returns true if the task must execute.
    pub fn is_ready(self) -> bool {
        matches!(self, RunnableStatus::Ready(_))
    }
}

impl fmt::Display for RunnableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnableStatus::Ready(reason) => write!(f, "{}", reason),
            RunnableStatus::Skip => write!(f, "up to date"),
        }
    }
}

/// The reason a task is due to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadyReason {
    /// Rerun was forced for the whole invocation.
    RunAlways,

    /// No run is recorded for this binary.
    NoPriorRun,

    /// The binary or a declared dependency changed since the last recorded
    /// run.
    Changed,
}

impl fmt::Display for ReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyReason::RunAlways => write!(f, "rerun forced"),
            ReadyReason::NoPriorRun => write!(f, "no recorded run"),
            ReadyReason::Changed => write!(f, "inputs changed"),
        }
    }
}

/// Decides whether `binary` must run given the recorded stamps.
///
/// Fingerprinting errors (for example a dependency missing from disk) count
/// as changed inputs.
pub fn runnable_status(binary: &TestBinary, stamps: &RunStamps, run_always: bool) -> RunnableStatus {
    if run_always {
        return RunnableStatus::Ready(ReadyReason::RunAlways);
    }
    let recorded = match stamps.get(&binary.binary) {
        Some(recorded) => recorded,
        None => return RunnableStatus::Ready(ReadyReason::NoPriorRun),
    };
    match TaskStamp::of_binary(binary) {
        Ok(ref current) if current == recorded => RunnableStatus::Skip,
        _ => RunnableStatus::Ready(ReadyReason::Changed),
    }
}
