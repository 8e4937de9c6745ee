use serde::{Deserialize, Serialize};

use crate::mq::Message;
use crate::task::ObjectRef;

/// Outcome of compiling a submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CompileResult {
    Succeeded,
    Failed { log: String },
}

/// Outcome of compiling a problem checker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CheckerCompileResult {
    Succeeded { checker: ObjectRef },
    Failed { log: String },
}

/// Verdict for one testcase run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradeStatus {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    /// Sandbox-level fault, not a property of the submission.
    SystemError,
}

impl GradeStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Result of grading one testcase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradeResult {
    pub status: GradeStatus,
    /// CPU time in milliseconds, if the run completed.
    pub time_ms: Option<u64>,
    /// Wall-clock time in milliseconds.
    pub wall_time_ms: Option<u64>,
    /// Peak memory in kilobytes.
    pub memory_kb: Option<u64>,
    pub message: String,
}

impl GradeResult {
    pub fn verdict_only(status: GradeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            time_ms: None,
            wall_time_ms: None,
            memory_kb: None,
            message: message.into(),
        }
    }
}

/// Result sent back from judging workers, mirroring the task kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JudgeResultMessage {
    Compile {
        submission_id: String,
        generation: i32,
        result: CompileResult,
    },
    CompileChecker {
        problem_id: String,
        result: CheckerCompileResult,
    },
    Grade {
        submission_id: String,
        generation: i32,
        testcase_index: usize,
        result: GradeResult,
    },
}

impl JudgeResultMessage {
    pub fn submission_id(&self) -> Option<&str> {
        match self {
            Self::Compile { submission_id, .. } | Self::Grade { submission_id, .. } => {
                Some(submission_id)
            }
            Self::CompileChecker { .. } => None,
        }
    }
}

impl Message for JudgeResultMessage {
    fn message_type() -> &'static str {
        "judge_result"
    }

    fn message_id(&self) -> String {
        match self {
            Self::Compile { submission_id, .. } => format!("compile:{submission_id}"),
            Self::CompileChecker { problem_id, .. } => format!("checker:{problem_id}"),
            Self::Grade {
                submission_id,
                testcase_index,
                ..
            } => format!("grade:{submission_id}:{testcase_index}"),
        }
    }
}
