use std::collections::BTreeMap;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-team, per-contest score aggregate.
///
/// The three JSON maps are keyed by problem id. `scores` is only ever
/// max-written; `times`/`penalties` are written alongside a score
/// improvement, never independently. Totals are recomputed by a full fold
/// over the maps, never incrementally.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "team_score")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub contest_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub team_id: String,

    /// problem id -> best score seen.
    #[sea_orm(column_type = "JsonBinary")]
    pub scores: serde_json::Value,
    /// problem id -> submission time of that best score (epoch millis).
    #[sea_orm(column_type = "JsonBinary")]
    pub times: serde_json::Value,
    /// problem id -> penalty at that best score.
    #[sea_orm(column_type = "JsonBinary")]
    pub penalties: serde_json::Value,

    pub total_score: f64,
    pub total_penalty: f64,
}

impl Model {
    pub fn score_map(&self) -> BTreeMap<String, f64> {
        serde_json::from_value(self.scores.clone()).unwrap_or_default()
    }

    pub fn time_map(&self) -> BTreeMap<String, i64> {
        serde_json::from_value(self.times.clone()).unwrap_or_default()
    }

    pub fn penalty_map(&self) -> BTreeMap<String, f64> {
        serde_json::from_value(self.penalties.clone()).unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
