use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "team")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub contest_id: String,
    pub name: String,
    /// JSON array of member user ids.
    #[sea_orm(column_type = "JsonBinary")]
    pub members: serde_json::Value,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn member_ids(&self) -> Vec<String> {
        serde_json::from_value(self.members.clone()).unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
