// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The registry of test binaries for one build run.
//!
//! The surrounding build graph writes a JSON manifest naming every test
//! binary it linked, the prerequisites whose change forces a rerun, and the
//! output directories of linked targets. Registration order is preserved
//! everywhere: it determines the order of library search paths.

use crate::{
    errors::{ManifestError, OutputWriteError},
    output::OutputFormat,
    stamp::RunnableStatus,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{fs, io};
use termcolor::{ColorSpec, NoColor, WriteColor};

/// A compiled test binary registered for execution.
///
/// Created when the build graph registers a test target; immutable
/// thereafter.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestBinary {
    /// Absolute path to the binary.
    pub binary: Utf8PathBuf,

    /// Link/install prerequisites whose change forces a rerun.
    #[serde(default)]
    pub deps: Vec<Utf8PathBuf>,
}

impl TestBinary {
    /// The directory the subprocess is launched in: the binary's parent.
    pub fn working_dir(&self) -> &Utf8Path {
        self.binary.parent().unwrap_or(Utf8Path::new("."))
    }
}

/// The ordered registry of test binaries and linked output directories.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BinaryList {
    /// Binaries in registration order.
    #[serde(default)]
    pub test_binaries: Vec<TestBinary>,

    /// Output directories of linked targets, in registration order.
    /// Duplicates are allowed and harmless.
    #[serde(default)]
    pub linked_dirs: Vec<Utf8PathBuf>,
}

impl BinaryList {
    /// Reads the registry from a manifest file.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ManifestError> {
        let data = fs::read(path).map_err(|error| ManifestError::Read {
            path: path.to_owned(),
            error,
        })?;
        serde_json::from_slice(&data).map_err(|error| ManifestError::Parse {
            path: path.to_owned(),
            error,
        })
    }

    /// Returns the number of registered binaries.
    pub fn len(&self) -> usize {
        self.test_binaries.len()
    }

    /// Returns true if no binaries are registered.
    pub fn is_empty(&self) -> bool {
        self.test_binaries.is_empty()
    }

    /// Iterates over the registered binaries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &'_ TestBinary> + '_ {
        self.test_binaries.iter()
    }

    /// Library search directories for the execution environment: every
    /// linked dir, then each binary's own output directory, in registration
    /// order.
    pub fn search_dirs(&self) -> Vec<Utf8PathBuf> {
        let mut dirs = self.linked_dirs.clone();
        dirs.extend(self.iter().map(|binary| binary.working_dir().to_owned()));
        dirs
    }

    /// Writes the registry to the given writer.
    ///
    /// `statuses` annotates each binary in plain output; serializable
    /// formats emit the registry itself.
    pub fn write(
        &self,
        format: OutputFormat,
        statuses: &[RunnableStatus],
        writer: impl WriteColor,
    ) -> Result<(), OutputWriteError> {
        match format {
            OutputFormat::Plain => Ok(self.write_plain(statuses, writer)?),
            OutputFormat::Serializable(format) => format.to_writer(self, writer),
        }
    }

    /// Writes the registry as a string with the given format.
    pub fn to_string(
        &self,
        format: OutputFormat,
        statuses: &[RunnableStatus],
    ) -> Result<String, OutputWriteError> {
        let mut buf = NoColor::new(vec![]);
        self.write(format, statuses, &mut buf)?;
        Ok(String::from_utf8(buf.into_inner()).expect("buffer is valid UTF-8"))
    }

    fn write_plain(
        &self,
        statuses: &[RunnableStatus],
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        let binary_spec = binary_spec();
        let field_spec = field_spec();

        for (test_binary, status) in self.iter().zip(statuses) {
            writer.set_color(&binary_spec)?;
            write!(writer, "{}", test_binary.binary)?;
            writer.reset()?;
            writeln!(writer, ":")?;

            writer.set_color(&field_spec)?;
            write!(writer, "  cwd: ")?;
            writer.reset()?;
            writeln!(writer, "{}", test_binary.working_dir())?;

            writer.set_color(&field_spec)?;
            write!(writer, "  status: ")?;
            writer.reset()?;
            writeln!(writer, "{}", status)?;

            if !test_binary.deps.is_empty() {
                writer.set_color(&field_spec)?;
                write!(writer, "  deps:")?;
                writer.reset()?;
                writeln!(writer)?;
                for dep in &test_binary.deps {
                    writeln!(writer, "    {}", dep)?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn binary_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Magenta))
        .set_bold(true);
    color_spec
}

pub(crate) fn field_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Yellow))
        .set_bold(true);
    color_spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::ReadyReason;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn fake_list() -> BinaryList {
        BinaryList {
            test_binaries: vec![
                TestBinary {
                    binary: "/fake/bin/alpha-test".into(),
                    deps: vec!["/fake/lib/liba.so".into()],
                },
                TestBinary {
                    binary: "/fake/bin/beta-test".into(),
                    deps: vec![],
                },
            ],
            linked_dirs: vec!["/fake/lib".into()],
        }
    }

    #[test]
    fn manifest_parses() {
        static MANIFEST: &str = indoc! {r#"
            {
              "test-binaries": [
                {
                  "binary": "/fake/bin/alpha-test",
                  "deps": ["/fake/lib/liba.so"]
                },
                {
                  "binary": "/fake/bin/beta-test"
                }
              ],
              "linked-dirs": ["/fake/lib"]
            }"#};

        let list: BinaryList = serde_json::from_str(MANIFEST).expect("manifest is valid");
        assert_eq!(list, fake_list());
    }

    #[test]
    fn search_dirs_follow_registration_order() {
        let list = fake_list();
        let dirs: Vec<Utf8PathBuf> = list.search_dirs();
        assert_eq!(
            dirs,
            vec![
                Utf8PathBuf::from("/fake/lib"),
                Utf8PathBuf::from("/fake/bin"),
                Utf8PathBuf::from("/fake/bin"),
            ]
        );
    }

    #[test]
    fn plain_output_lists_binaries_and_statuses() {
        static EXPECTED_PLAIN: &str = indoc! {"
            /fake/bin/alpha-test:
              cwd: /fake/bin
              status: no recorded run
              deps:
                /fake/lib/liba.so
            /fake/bin/beta-test:
              cwd: /fake/bin
              status: up to date
        "};

        let list = fake_list();
        let statuses = [
            RunnableStatus::Ready(ReadyReason::NoPriorRun),
            RunnableStatus::Skip,
        ];
        assert_eq!(
            list.to_string(OutputFormat::Plain, &statuses)
                .expect("plain succeeded"),
            EXPECTED_PLAIN
        );
    }

    #[test]
    fn json_output_round_trips() {
        let list = fake_list();
        let json = list
            .to_string(
                OutputFormat::Serializable(crate::output::SerializableFormat::JsonPretty),
                &[],
            )
            .expect("json succeeded");
        let parsed: BinaryList = serde_json::from_str(&json).expect("output is valid JSON");
        assert_eq!(parsed, list);
    }
}
