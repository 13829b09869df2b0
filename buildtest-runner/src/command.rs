// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Formatting of the per-binary launch command.
//!
//! Users can wrap every test binary in an external command, e.g.
//! `--runcmd 'valgrind %s'` runs each binary under valgrind. The template is
//! parsed once per build invocation so a malformed one is rejected before
//! any test launches.

use crate::{context::RunOptions, errors::ConfigurationError};
use camino::Utf8Path;

/// The substitution point recognized in run-command templates.
pub const PLACEHOLDER: &str = "%s";

/// A validated run-command template.
#[derive(Clone, Debug, Default)]
pub enum RunCommand {
    /// Execute the binary directly.
    #[default]
    Direct,

    /// Wrap the binary in a user-supplied command containing exactly one
    /// `%s` substitution point.
    Template(String),
}

impl RunCommand {
    /// Parses an optional template, rejecting anything that cannot produce a
    /// runnable command for every binary.
    pub fn parse(template: Option<&str>) -> Result<Self, ConfigurationError> {
        let template = match template {
            Some(template) => template,
            None => return Ok(RunCommand::Direct),
        };

        let count = template.matches(PLACEHOLDER).count();
        if count != 1 {
            return Err(ConfigurationError::PlaceholderCount {
                template: template.to_owned(),
                count,
            });
        }
        if substitute(template, "x").is_empty() {
            return Err(ConfigurationError::EmptyCommand {
                template: template.to_owned(),
            });
        }
        Ok(RunCommand::Template(template.to_owned()))
    }

    /// Produces the argument vector for one binary.
    ///
    /// Templated commands are split on whitespace, so binary paths
    /// containing spaces are not representable under a template; callers
    /// needing such paths must execute the binary directly.
    pub fn command_for(&self, binary: &Utf8Path) -> Vec<String> {
        match self {
            RunCommand::Direct => vec![binary.to_string()],
            RunCommand::Template(template) => substitute(template, binary.as_str()),
        }
    }
}

/// Formats the launch command for `binary` under the given options.
pub fn format_command(
    binary: &Utf8Path,
    options: &RunOptions,
) -> Result<Vec<String>, ConfigurationError> {
    Ok(RunCommand::parse(options.run_command.as_deref())?.command_for(binary))
}

fn substitute(template: &str, binary: &str) -> Vec<String> {
    template
        .replacen(PLACEHOLDER, binary, 1)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(template: Option<&str>) -> RunOptions {
        RunOptions {
            run_command: template.map(str::to_owned),
            ..RunOptions::default()
        }
    }

    #[test]
    fn template_substitutes_binary_path() {
        let argv = format_command(Utf8Path::new("/out/t1"), &options(Some("valgrind %s")))
            .expect("valid template");
        assert_eq!(argv, vec!["valgrind", "/out/t1"]);
    }

    #[test]
    fn template_keeps_extra_arguments() {
        let argv = format_command(
            Utf8Path::new("/out/t1"),
            &options(Some("valgrind --error-exitcode=2 %s")),
        )
        .expect("valid template");
        assert_eq!(argv, vec!["valgrind", "--error-exitcode=2", "/out/t1"]);
    }

    #[test]
    fn no_template_runs_binary_directly() {
        let argv = format_command(Utf8Path::new("/out/t1"), &options(None)).expect("no template");
        assert_eq!(argv, vec!["/out/t1"]);
    }

    #[test]
    fn zero_placeholders_are_rejected() {
        let err = format_command(Utf8Path::new("/out/t1"), &options(Some("valgrind")))
            .expect_err("missing placeholder");
        assert!(matches!(
            err,
            ConfigurationError::PlaceholderCount { count: 0, .. }
        ));
    }

    #[test]
    fn multiple_placeholders_are_rejected() {
        let err = format_command(Utf8Path::new("/out/t1"), &options(Some("%s %s")))
            .expect_err("too many placeholders");
        assert!(matches!(
            err,
            ConfigurationError::PlaceholderCount { count: 2, .. }
        ));
    }
}
