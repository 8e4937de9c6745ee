#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission as it moves through the judging pipeline.
///
/// Transitions are strictly forward:
/// Compiling -> {Grading, CompileFailed, Terminated} and
/// Grading -> {Graded, Terminated}. Graded, CompileFailed and Terminated are
/// terminal.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in
/// SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum SubmissionStatus {
    /// Compile task emitted, waiting for its result.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Compiling"))]
    Compiling,
    /// Grade tasks fanned out, per-testcase results arriving.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Grading"))]
    Grading,
    /// Compilation failed; compiler log captured.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "CompileFailed"))]
    CompileFailed,
    /// All testcases graded, score and penalty computed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Graded"))]
    Graded,
    /// Pipeline gave up (dead-lettered task, missing checker, ...).
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Terminated"))]
    Terminated,
}

impl SubmissionStatus {
    /// Returns true once judging can no longer progress this submission.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Compiling | Self::Grading)
    }

    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Compiling,
        Self::Grading,
        Self::CompileFailed,
        Self::Graded,
        Self::Terminated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compiling => "Compiling",
            Self::Grading => "Grading",
            Self::CompileFailed => "CompileFailed",
            Self::Graded => "Graded",
            Self::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Compiling" => Ok(Self::Compiling),
            "Grading" => Ok(Self::Grading),
            "CompileFailed" => Ok(Self::CompileFailed),
            "Graded" => Ok(Self::Graded),
            "Terminated" => Ok(Self::Terminated),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip() {
        for status in SubmissionStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            let parsed: SubmissionStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn from_str_parses_valid_and_rejects_invalid() {
        assert_eq!(
            "Grading".parse::<SubmissionStatus>().unwrap(),
            SubmissionStatus::Grading
        );
        assert!("Running".parse::<SubmissionStatus>().is_err());
    }

    #[test]
    fn finality() {
        assert!(!SubmissionStatus::Compiling.is_final());
        assert!(!SubmissionStatus::Grading.is_final());
        assert!(SubmissionStatus::Graded.is_final());
        assert!(SubmissionStatus::CompileFailed.is_final());
        assert!(SubmissionStatus::Terminated.is_final());
    }
}
