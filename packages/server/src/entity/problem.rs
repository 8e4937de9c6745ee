use common::language::Constraints;
use common::task::ObjectRef;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One testcase file reference. `name` is the filename within the problem's
/// testcase namespace; the stored object is keyed "{problem_id}/{name}".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestcaseFile {
    pub name: String,
    pub version_id: String,
}

/// One entry in the problem's ordered testcase list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemTestcase {
    pub input: TestcaseFile,
    pub output: TestcaseFile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<i32>,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "problem")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub contest_id: String,
    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub context: String, // in Markdown
    #[sea_orm(column_type = "Text")]
    pub input_format: String,
    #[sea_orm(column_type = "Text")]
    pub output_format: String,

    /// Whether partial credit is awarded for a subset of passing testcases.
    pub partials: bool,

    /// JSON-encoded [`Constraints`].
    #[sea_orm(column_type = "JsonBinary")]
    pub constraints: serde_json::Value,
    /// JSON array of [`ProblemTestcase`].
    #[sea_orm(column_type = "JsonBinary")]
    pub testcases: serde_json::Value,
    /// JSON-encoded [`ObjectRef`] of the compiled checker; NULL until the
    /// CompileChecker result arrives.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub checker: Option<serde_json::Value>,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn testcase_list(&self) -> Result<Vec<ProblemTestcase>, serde_json::Error> {
        serde_json::from_value(self.testcases.clone())
    }

    pub fn constraint_limits(&self) -> Result<Constraints, serde_json::Error> {
        serde_json::from_value(self.constraints.clone())
    }

    pub fn checker_ref(&self) -> Option<ObjectRef> {
        self.checker
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

impl ActiveModelBehavior for ActiveModel {}
