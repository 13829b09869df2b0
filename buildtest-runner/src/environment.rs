// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Construction of the environment test subprocesses are launched with.
//!
//! Linked targets land their outputs in directories the dynamic loader knows
//! nothing about, so every test binary runs with those directories prepended
//! to the platform's library search path variables. The environment is built
//! once per build invocation (see [`BuildRunContext::execution_env`]) and
//! shared read-only by every task afterwards.
//!
//! [`BuildRunContext::execution_env`]: crate::context::BuildRunContext::execution_env

use crate::errors::EnvironmentError;
use camino::Utf8PathBuf;
use std::{
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    path::PathBuf,
};

/// Names of the environment variables the dynamic loader consults when
/// resolving libraries for a launched binary.
pub(crate) fn dylib_path_envvars() -> &'static [&'static str] {
    if cfg!(windows) {
        // Windows has no dedicated loader path; DLLs are resolved through
        // the ordinary executable search path.
        &["PATH"]
    } else if cfg!(target_os = "macos") {
        // dyld searches DYLD_LIBRARY_PATH before the install path recorded
        // in the binary. Some toolchains resolve unversioned dylibs through
        // LD_LIBRARY_PATH as well, so both are set.
        &["DYLD_LIBRARY_PATH", "LD_LIBRARY_PATH"]
    } else {
        &["LD_LIBRARY_PATH"]
    }
}

/// The full set of environment variables a test subprocess is launched with.
#[derive(Clone, Debug)]
pub struct ExecutionEnvironment {
    vars: BTreeMap<OsString, OsString>,
}

impl ExecutionEnvironment {
    /// Builds the environment from the current process environment, with
    /// `search_dirs` prepended to the platform loader variables.
    pub fn build(search_dirs: &[Utf8PathBuf]) -> Result<Self, EnvironmentError> {
        Self::with_base(env::vars_os(), search_dirs)
    }

    /// Builds the environment from an explicitly supplied base environment.
    ///
    /// `search_dirs` is kept in registration order; duplicates are harmless.
    /// Any pre-existing value of a loader variable is preserved as the
    /// suffix of the new value.
    pub fn with_base(
        base: impl IntoIterator<Item = (OsString, OsString)>,
        search_dirs: &[Utf8PathBuf],
    ) -> Result<Self, EnvironmentError> {
        let mut vars: BTreeMap<OsString, OsString> = base.into_iter().collect();

        for &var in dylib_path_envvars() {
            let mut paths: Vec<PathBuf> = search_dirs
                .iter()
                .map(|dir| dir.as_std_path().to_path_buf())
                .collect();
            if let Some(existing) = vars.get(OsStr::new(var)) {
                paths.extend(env::split_paths(existing));
            }
            let joined = env::join_paths(paths)
                .map_err(|error| EnvironmentError::JoinPaths { var, error })?;
            vars.insert(OsString::from(var), joined);
        }

        Ok(Self { vars })
    }

    /// Returns the value of a variable, if set.
    pub fn get(&self, var: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(var.as_ref()).map(OsString::as_os_str)
    }

    /// Iterates over all variables.
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> + '_ {
        self.vars
            .iter()
            .map(|(var, value)| (var.as_os_str(), value.as_os_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> Vec<(OsString, OsString)> {
        vec![
            ("HOME".into(), "/home/me".into()),
            ("LD_LIBRARY_PATH".into(), "/existing/lib".into()),
        ]
    }

    #[test]
    fn search_dirs_are_prepended_in_order() {
        let search_dirs = vec![
            Utf8PathBuf::from("/out/liba"),
            Utf8PathBuf::from("/out/libb"),
            // Duplicates are allowed and harmless.
            Utf8PathBuf::from("/out/liba"),
        ];
        let env = ExecutionEnvironment::with_base(base_env(), &search_dirs)
            .expect("environment built");

        for &var in dylib_path_envvars() {
            let value = env.get(var).expect("loader variable set");
            let paths: Vec<PathBuf> = env::split_paths(value).collect();
            assert_eq!(&paths[..3], &[
                PathBuf::from("/out/liba"),
                PathBuf::from("/out/libb"),
                PathBuf::from("/out/liba"),
            ]);
            if var == "LD_LIBRARY_PATH" {
                assert_eq!(paths.last(), Some(&PathBuf::from("/existing/lib")));
            }
        }
    }

    #[test]
    fn unrelated_variables_are_inherited() {
        let env = ExecutionEnvironment::with_base(base_env(), &[Utf8PathBuf::from("/out")])
            .expect("environment built");
        assert_eq!(env.get("HOME"), Some(OsStr::new("/home/me")));
    }

    #[test]
    fn empty_base_still_sets_loader_variables() {
        let env = ExecutionEnvironment::with_base(vec![], &[Utf8PathBuf::from("/out")])
            .expect("environment built");
        for &var in dylib_path_envvars() {
            let value = env.get(var).expect("loader variable set");
            assert_eq!(env::split_paths(value).next(), Some(PathBuf::from("/out")));
        }
    }

    #[test]
    fn process_environment_is_the_default_base() {
        let env = ExecutionEnvironment::build(&[Utf8PathBuf::from("/out")])
            .expect("environment built");
        for &var in dylib_path_envvars() {
            assert!(env.get(var).is_some(), "{} should be set", var);
        }
    }
}
