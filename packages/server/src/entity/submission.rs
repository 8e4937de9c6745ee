use common::SubmissionStatus;
use common::result::GradeResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One per-testcase slot in a grading submission.
/// Stored as a JSON array; slots are created empty when grading fans out
/// and filled by grade results keyed by index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestcaseSlot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GradeResult>,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub problem_id: String,
    /// NULL for standalone/testing submissions.
    pub contest_id: Option<String>,
    pub team_id: Option<String>,
    pub user_id: String,

    pub language: String,
    #[sea_orm(column_type = "Text")]
    pub source: String,

    pub status: SubmissionStatus,
    /// Rejudge epoch. Results carrying a stale generation are discarded.
    pub generation: i32,

    /// Testcase results received so far; present only while Grading.
    pub graded_cases: Option<i32>,
    /// JSON array of [`TestcaseSlot`], one per problem testcase.
    #[sea_orm(column_type = "JsonBinary")]
    pub testcases: serde_json::Value,

    /// Final score in 0..=100; present only once Graded.
    pub score: Option<f64>,
    pub penalty: Option<f64>,
    /// Diagnostic text for CompileFailed/Terminated.
    pub log: Option<String>,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn testcase_slots(&self) -> Result<Vec<TestcaseSlot>, serde_json::Error> {
        serde_json::from_value(self.testcases.clone())
    }
}

impl ActiveModelBehavior for ActiveModel {}
