use serde::{Deserialize, Serialize};

use crate::language::{Constraints, Language};
use crate::mq::Message;

/// A versioned object in blob storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object name within its bucket (e.g. "{problem_id}/1.in").
    pub object_name: String,
    /// Exact content version; reads against a different version are a miss.
    pub version_id: String,
}

/// Input/expected-output pair for one testcase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestcasePair {
    pub input: ObjectRef,
    pub output: ObjectRef,
}

/// Task sent to judging workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JudgeTask {
    /// Compile a submission's source and persist the produced binary.
    Compile {
        submission_id: String,
        /// Rejudge epoch; results from a stale generation are discarded.
        generation: i32,
        language: Language,
        source: String,
        constraints: Constraints,
    },
    /// Compile a problem's checker with the fixed checker toolchain.
    CompileChecker { problem_id: String, source: String },
    /// Run one testcase against a previously compiled submission binary.
    Grade {
        submission_id: String,
        generation: i32,
        problem_id: String,
        testcase_index: usize,
        language: Language,
        constraints: Constraints,
        testcase: TestcasePair,
        checker: ObjectRef,
    },
}

impl JudgeTask {
    /// The submission this task belongs to, if any.
    pub fn submission_id(&self) -> Option<&str> {
        match self {
            Self::Compile { submission_id, .. } | Self::Grade { submission_id, .. } => {
                Some(submission_id)
            }
            Self::CompileChecker { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Compile { .. } => "Compile",
            Self::CompileChecker { .. } => "CompileChecker",
            Self::Grade { .. } => "Grade",
        }
    }
}

impl Message for JudgeTask {
    fn message_type() -> &'static str {
        "judge_task"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_are_tagged_by_kind() {
        let task = JudgeTask::CompileChecker {
            problem_id: "p1".into(),
            source: "int main() {}".into(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["kind"], "CompileChecker");

        let decoded: JudgeTask = serde_json::from_value(json).unwrap();
        assert!(matches!(decoded, JudgeTask::CompileChecker { .. }));
    }

    #[test]
    fn grade_task_round_trip() {
        let task = JudgeTask::Grade {
            submission_id: "s1".into(),
            generation: 2,
            problem_id: "p1".into(),
            testcase_index: 3,
            language: Language::Cpp,
            constraints: Constraints::default(),
            testcase: TestcasePair {
                input: ObjectRef {
                    object_name: "p1/1.in".into(),
                    version_id: "v1".into(),
                },
                output: ObjectRef {
                    object_name: "p1/1.out".into(),
                    version_id: "v2".into(),
                },
            },
            checker: ObjectRef {
                object_name: "p1".into(),
                version_id: "v3".into(),
            },
        };
        let json = serde_json::to_string(&task).unwrap();
        let decoded: JudgeTask = serde_json::from_str(&json).unwrap();
        match decoded {
            JudgeTask::Grade {
                testcase_index,
                generation,
                ..
            } => {
                assert_eq!(testcase_index, 3);
                assert_eq!(generation, 2);
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn submission_id_by_kind() {
        let compile = JudgeTask::Compile {
            submission_id: "s1".into(),
            generation: 0,
            language: Language::Python,
            source: String::new(),
            constraints: Constraints::default(),
        };
        assert_eq!(compile.submission_id(), Some("s1"));

        let checker = JudgeTask::CompileChecker {
            problem_id: "p1".into(),
            source: String::new(),
        };
        assert_eq!(checker.submission_id(), None);
    }
}
