//! Score and penalty computation, team score aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::cache::CacheStore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::json;
use tracing::info;

use super::{lock_for_update, ranklist};
use crate::entity::team_score;
use crate::error::Result;

/// Penalty hours charged per rejected attempt before the accepted one.
pub const PER_ATTEMPT_PENALTY: f64 = 10.0;

/// Score of a fully graded submission, in 0..=100.
pub fn compute_score(partials: bool, passes: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    if partials {
        passes as f64 / total as f64 * 100.0
    } else if passes == total {
        100.0
    } else {
        0.0
    }
}

/// Penalty of a graded submission. Only perfect submissions carry penalty;
/// `prior_rejected` counts this team's earlier non-perfect submissions on
/// the same problem.
pub fn compute_penalty(
    score: f64,
    prior_rejected: u64,
    submitted_at: DateTime<Utc>,
    contest_start: DateTime<Utc>,
) -> f64 {
    if score != 100.0 {
        return 0.0;
    }
    let hours_since_start =
        (submitted_at - contest_start).num_milliseconds() as f64 / 3_600_000.0;
    prior_rejected as f64 * PER_ATTEMPT_PENALTY + hours_since_start
}

fn fold_total(map: &BTreeMap<String, f64>) -> f64 {
    map.values().sum()
}

/// Recompute `total_score`/`total_penalty` for one team (or every team of a
/// contest) from the authoritative per-problem maps. Always a full fold,
/// never incremental.
pub async fn recalculate_team_total<C: ConnectionTrait>(
    conn: &C,
    contest_id: &str,
    team_id: Option<&str>,
) -> Result<()> {
    let mut query =
        team_score::Entity::find().filter(team_score::Column::ContestId.eq(contest_id));
    if let Some(team_id) = team_id {
        query = query.filter(team_score::Column::TeamId.eq(team_id));
    }

    for row in query.all(conn).await? {
        let total_score = fold_total(&row.score_map());
        let total_penalty = fold_total(&row.penalty_map());
        let update = team_score::ActiveModel {
            contest_id: Set(row.contest_id),
            team_id: Set(row.team_id),
            total_score: Set(total_score),
            total_penalty: Set(total_penalty),
            ..Default::default()
        };
        update.update(conn).await?;
    }

    Ok(())
}

/// Max-write a graded submission's score into the team aggregate.
///
/// Time and penalty entries are only written alongside a score improvement.
/// Every improvement flags the contest's ranklist obsolete. Returns whether
/// the score improved.
pub async fn apply_score_update(
    db: &sea_orm::DatabaseConnection,
    cache_store: &Arc<dyn CacheStore>,
    contest_id: &str,
    team_id: &str,
    problem_id: &str,
    score: f64,
    penalty: f64,
    submitted_at: DateTime<Utc>,
) -> Result<bool> {
    let txn = db.begin().await?;
    let backend = txn.get_database_backend();

    let existing = lock_for_update(
        team_score::Entity::find_by_id((contest_id.to_string(), team_id.to_string())),
        backend,
    )
    .one(&txn)
    .await?;

    let improved = match existing {
        None => {
            let row = team_score::ActiveModel {
                contest_id: Set(contest_id.to_string()),
                team_id: Set(team_id.to_string()),
                scores: Set(json!({ problem_id: score })),
                times: Set(json!({ problem_id: submitted_at.timestamp_millis() })),
                penalties: Set(json!({ problem_id: penalty })),
                total_score: Set(score),
                total_penalty: Set(penalty),
            };
            row.insert(&txn).await?;
            true
        }
        Some(row) => {
            let mut scores = row.score_map();
            let best = scores.get(problem_id).copied();
            if best.is_some_and(|b| score <= b) {
                false
            } else {
                scores.insert(problem_id.to_string(), score);
                let mut times = row.time_map();
                times.insert(problem_id.to_string(), submitted_at.timestamp_millis());
                let mut penalties = row.penalty_map();
                penalties.insert(problem_id.to_string(), penalty);

                let update = team_score::ActiveModel {
                    contest_id: Set(row.contest_id),
                    team_id: Set(row.team_id),
                    scores: Set(serde_json::to_value(&scores)?),
                    times: Set(serde_json::to_value(&times)?),
                    penalties: Set(serde_json::to_value(&penalties)?),
                    total_score: Set(fold_total(&scores)),
                    total_penalty: Set(fold_total(&penalties)),
                };
                update.update(&txn).await?;
                true
            }
        }
    };

    txn.commit().await?;

    if improved {
        info!(contest_id, team_id, problem_id, score, "Team score improved");
        ranklist::mark_ranklist_obsolete(cache_store, contest_id).await;
    }

    Ok(improved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn score_all_or_nothing_without_partials() {
        assert_eq!(compute_score(false, 3, 3), 100.0);
        assert_eq!(compute_score(false, 2, 3), 0.0);
        assert_eq!(compute_score(false, 0, 3), 0.0);
    }

    #[test]
    fn score_proportional_with_partials() {
        assert_eq!(compute_score(true, 1, 4), 25.0);
        assert_eq!(compute_score(true, 4, 4), 100.0);
        assert_eq!(compute_score(true, 0, 4), 0.0);
    }

    #[test]
    fn score_of_empty_testcase_list_is_zero() {
        assert_eq!(compute_score(false, 0, 0), 0.0);
        assert_eq!(compute_score(true, 0, 0), 0.0);
    }

    #[test]
    fn penalty_only_for_perfect_score() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();

        assert_eq!(compute_penalty(50.0, 4, submitted, start), 0.0);
        assert_eq!(compute_penalty(0.0, 0, submitted, start), 0.0);

        // 2 rejected attempts, 1.5 hours into the contest.
        let penalty = compute_penalty(100.0, 2, submitted, start);
        assert!((penalty - 21.5).abs() < 1e-9);
    }

    #[test]
    fn penalty_with_no_prior_attempts_is_elapsed_hours() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 5, 1, 9, 36, 0).unwrap();
        let penalty = compute_penalty(100.0, 0, submitted, start);
        assert!((penalty - 0.6).abs() < 1e-9);
    }
}
