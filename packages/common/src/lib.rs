pub mod cache;
pub mod config;
pub mod language;
pub mod mq;
pub mod result;
pub mod retry;
pub mod storage;
pub mod submission_status;
pub mod task;

pub use language::{Constraints, Language, LanguageConfig, LanguageRegistry};
pub use result::{
    CheckerCompileResult, CompileResult, GradeResult, GradeStatus, JudgeResultMessage,
};
pub use submission_status::SubmissionStatus;
pub use task::{JudgeTask, ObjectRef, TestcasePair};
