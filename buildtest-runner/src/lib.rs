// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrent execution of a build graph's compiled test binaries.
//!
//! This crate is the piece of a build pipeline that sits between "the test
//! binaries are linked" and "the results are reported": it decides which
//! binaries are due to run (by fingerprinting the binary and its declared
//! dependencies against the last recorded run), constructs the environment
//! they run in (library search paths collected from linked target output
//! directories), runs them in parallel with stdout and stderr captured, and
//! aggregates the outcomes into a sink that reporting code drains once the
//! run is over.
//!
//! A nonzero exit code is deliberately not an error at this layer: the
//! execution layer observes, the reporting layer judges. Only a subprocess
//! that cannot be spawned fails its task.

pub mod binary_list;
pub mod command;
pub mod context;
pub mod dispatch;
pub mod environment;
pub mod errors;
pub mod output;
pub mod results;
pub mod runner;
pub mod stamp;
