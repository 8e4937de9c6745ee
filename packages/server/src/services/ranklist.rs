//! Ranklist computation with staleness control.
//!
//! Score updates flag a contest's ranklist obsolete instead of recomputing
//! it inline. A ranklist read recomputes only when the cached value is old
//! enough and this reader wins the atomic take of the obsolete marker, so
//! bursty scoring activity cannot trigger recomputation storms.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::cache::CacheStore;
use common::retry::jittered_ttl;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{team, team_score, user};
use crate::error::Result;

/// Nominal lifetime of a cached ranklist. Effectively "forever"; freshness
/// comes from the obsolete marker, not from expiry.
pub const RANKLIST_TTL: Duration = Duration::from_secs(365 * 24 * 3600);
/// Minimum gap between two recomputations of the same contest's ranklist.
pub const MIN_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RanklistMember {
    pub user_id: String,
    pub username: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RanklistRow {
    pub team_id: String,
    pub team_name: String,
    pub members: Vec<RanklistMember>,
    pub total_score: f64,
    pub total_penalty: f64,
}

#[derive(Serialize, Deserialize)]
struct CachedRanklist {
    computed_at_ms: i64,
    rows: Vec<RanklistRow>,
}

pub(crate) fn ranklist_key(contest_id: &str) -> String {
    format!("ranklist:{contest_id}")
}

pub(crate) fn obsolete_key(contest_id: &str) -> String {
    format!("ranklist:{contest_id}:obsolete")
}

/// Flag a contest's cached ranklist as out of date.
pub async fn mark_ranklist_obsolete(store: &Arc<dyn CacheStore>, contest_id: &str) {
    store
        .set(&obsolete_key(contest_id), "1".into(), RANKLIST_TTL)
        .await;
}

/// Fetch the contest ranklist, serving the cached value unless it is
/// obsolete, old enough, and this reader claims the marker.
pub async fn fetch_ranklist<C: ConnectionTrait>(
    db: &C,
    store: &Arc<dyn CacheStore>,
    contest_id: &str,
) -> Result<Vec<RanklistRow>> {
    let key = ranklist_key(contest_id);

    let cached: Option<CachedRanklist> = match store.get(&key).await {
        Some(raw) => serde_json::from_str(&raw).ok(),
        None => None,
    };

    if let Some(cached) = &cached {
        let age_ms = Utc::now().timestamp_millis() - cached.computed_at_ms;
        if age_ms < MIN_RECOMPUTE_INTERVAL.as_millis() as i64 {
            debug!(contest_id, age_ms, "Serving cached ranklist inside recompute interval");
            return Ok(cached.rows.clone());
        }
        if store.take(&obsolete_key(contest_id)).await.is_none() {
            // Fresh, or another reader claimed the recomputation.
            return Ok(cached.rows.clone());
        }
    } else {
        // No cached value: recompute unconditionally and clear any marker.
        store.delete(&obsolete_key(contest_id)).await;
    }

    let rows = compute_ranklist(db, contest_id).await?;
    let entry = CachedRanklist {
        computed_at_ms: Utc::now().timestamp_millis(),
        rows: rows.clone(),
    };
    store
        .set(&key, serde_json::to_string(&entry)?, jittered_ttl(RANKLIST_TTL))
        .await;
    info!(contest_id, teams = rows.len(), "Ranklist recomputed");

    Ok(rows)
}

/// Join team scores with team and member identity, sorted by
/// (total score desc, total penalty asc).
async fn compute_ranklist<C: ConnectionTrait>(
    db: &C,
    contest_id: &str,
) -> Result<Vec<RanklistRow>> {
    let score_rows = team_score::Entity::find()
        .filter(team_score::Column::ContestId.eq(contest_id))
        .order_by_desc(team_score::Column::TotalScore)
        .order_by_asc(team_score::Column::TotalPenalty)
        .all(db)
        .await?;

    let teams: HashMap<String, team::Model> = team::Entity::find()
        .filter(team::Column::ContestId.eq(contest_id))
        .all(db)
        .await?
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();

    let member_ids: BTreeSet<String> = teams
        .values()
        .flat_map(|t| t.member_ids())
        .collect();
    let users: HashMap<String, user::Model> = user::Entity::find()
        .filter(user::Column::Id.is_in(member_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();

    let rows = score_rows
        .into_iter()
        .filter_map(|score| {
            let team = teams.get(&score.team_id)?;
            let members = team
                .member_ids()
                .into_iter()
                .filter_map(|id| {
                    users.get(&id).map(|u| RanklistMember {
                        user_id: u.id.clone(),
                        username: u.username.clone(),
                        name: u.name.clone(),
                    })
                })
                .collect();
            Some(RanklistRow {
                team_id: score.team_id,
                team_name: team.name.clone(),
                members,
                total_score: score.total_score,
                total_penalty: score.total_penalty,
            })
        })
        .collect();

    Ok(rows)
}
