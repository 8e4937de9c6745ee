use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Single-use token gating a problem-package upload.
/// Consumed (found and deleted) in one transaction.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub contest_id: String,
    /// When set, the upload replaces this problem instead of creating one.
    pub replace_problem_id: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
