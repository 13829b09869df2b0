// Copyright (c) The buildtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{OutputFormatParseError, OutputWriteError};
use serde::Serialize;
use std::{fmt, io, str::FromStr};

/// Output format for lists and drained results.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    /// Human-readable output.
    Plain,

    /// Machine-readable output.
    Serializable(SerializableFormat),
}

impl OutputFormat {
    /// Returns the string values accepted on the command line.
    pub fn variants() -> [&'static str; 3] {
        ["plain", "json", "json-pretty"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Serializable(SerializableFormat::Json) => write!(f, "json"),
            OutputFormat::Serializable(SerializableFormat::JsonPretty) => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = OutputFormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "plain" => OutputFormat::Plain,
            "json" => OutputFormat::Serializable(SerializableFormat::Json),
            "json-pretty" => OutputFormat::Serializable(SerializableFormat::JsonPretty),
            other => return Err(OutputFormatParseError::new(other)),
        };
        Ok(val)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Plain
    }
}

/// A machine-readable output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SerializableFormat {
    Json,
    JsonPretty,
}

impl SerializableFormat {
    /// Write this data in the given format to the writer.
    pub fn to_writer(
        self,
        value: &impl Serialize,
        writer: impl io::Write,
    ) -> Result<(), OutputWriteError> {
        match self {
            SerializableFormat::Json => Ok(serde_json::to_writer(writer, value)?),
            SerializableFormat::JsonPretty => Ok(serde_json::to_writer_pretty(writer, value)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_variants() {
        for &variant in &OutputFormat::variants() {
            let format = variant.parse::<OutputFormat>().expect("variant is valid");
            assert_eq!(format!("{}", format), variant, "Display round-trips");
        }
    }

    #[test]
    fn output_format_rejects_unknown() {
        assert!("toml".parse::<OutputFormat>().is_err());
        assert!("".parse::<OutputFormat>().is_err());
    }
}
