//! Contest lifecycle and the cached read paths built on top of it.

use chrono::{DateTime, Utc};
use common::storage::Bucket;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::ranklist::{obsolete_key, ranklist_key};
use crate::entity::{contest, problem, submission, team, team_score, upload_session};
use crate::error::{Result, ServiceError};
use crate::state::AppState;

pub(crate) fn contest_key(contest_id: &str) -> String {
    format!("contest:{contest_id}")
}

pub(crate) fn problem_list_key(contest_id: &str) -> String {
    format!("problem-list:{contest_id}")
}

pub struct NewContest {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub published: bool,
}

/// One row of the cached contest problem list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub id: String,
    pub name: String,
    pub partials: bool,
}

pub async fn create_contest(state: &AppState, new: NewContest) -> Result<String> {
    let contest_id = Uuid::new_v4().to_string();
    let row = contest::ActiveModel {
        id: Set(contest_id.clone()),
        name: Set(new.name),
        start_time: Set(new.start_time),
        end_time: Set(new.end_time),
        published: Set(new.published),
        created_at: Set(Utc::now()),
    };
    row.insert(&state.db).await?;
    info!(contest_id, "Contest created");
    Ok(contest_id)
}

pub async fn fetch_contest(state: &AppState, contest_id: &str) -> Result<contest::Model> {
    state
        .cache
        .read_through(&contest_key(contest_id), || async {
            contest::Entity::find_by_id(contest_id)
                .one(&state.db)
                .await?
                .ok_or(ServiceError::NotFound("contest"))
        })
        .await?
}

pub async fn fetch_problem_list(
    state: &AppState,
    contest_id: &str,
) -> Result<Vec<ProblemSummary>> {
    state
        .cache
        .read_through(&problem_list_key(contest_id), || async {
            let rows = problem::Entity::find()
                .filter(problem::Column::ContestId.eq(contest_id))
                .order_by_asc(problem::Column::CreatedAt)
                .all(&state.db)
                .await?;
            Ok::<_, ServiceError>(
                rows.into_iter()
                    .map(|p| ProblemSummary {
                        id: p.id,
                        name: p.name,
                        partials: p.partials,
                    })
                    .collect(),
            )
        })
        .await?
}

/// Transactional cascade over everything owned by a contest, followed by
/// blob and cache cleanup outside the transaction.
pub async fn delete_contest(state: &AppState, contest_id: &str) -> Result<()> {
    let txn = state.db.begin().await?;

    contest::Entity::find_by_id(contest_id)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("contest"))?;

    // Blob names must be collected before the rows disappear.
    let problems = problem::Entity::find()
        .filter(problem::Column::ContestId.eq(contest_id))
        .all(&txn)
        .await?;
    let mut blobs: Vec<(Bucket, String)> = Vec::new();
    for p in &problems {
        for tc in p.testcase_list()? {
            blobs.push((Bucket::Testcases, format!("{}/{}", p.id, tc.input.name)));
            blobs.push((Bucket::Testcases, format!("{}/{}", p.id, tc.output.name)));
        }
        blobs.push((Bucket::Checkers, p.id.clone()));
    }
    let submissions = submission::Entity::find()
        .filter(submission::Column::ContestId.eq(contest_id))
        .all(&txn)
        .await?;
    for s in &submissions {
        blobs.push((Bucket::Binaries, s.id.clone()));
    }

    submission::Entity::delete_many()
        .filter(submission::Column::ContestId.eq(contest_id))
        .exec(&txn)
        .await?;
    upload_session::Entity::delete_many()
        .filter(upload_session::Column::ContestId.eq(contest_id))
        .exec(&txn)
        .await?;
    team_score::Entity::delete_many()
        .filter(team_score::Column::ContestId.eq(contest_id))
        .exec(&txn)
        .await?;
    team::Entity::delete_many()
        .filter(team::Column::ContestId.eq(contest_id))
        .exec(&txn)
        .await?;
    problem::Entity::delete_many()
        .filter(problem::Column::ContestId.eq(contest_id))
        .exec(&txn)
        .await?;
    contest::Entity::delete_by_id(contest_id).exec(&txn).await?;
    txn.commit().await?;

    for (bucket, name) in blobs {
        if let Err(e) = state.storage.delete_all(bucket, &name).await {
            warn!(bucket = ?bucket, name, error = %e, "Failed to delete stored object");
        }
    }

    state.cache.delete(&contest_key(contest_id)).await;
    state.cache.delete(&problem_list_key(contest_id)).await;
    state.cache.delete(&ranklist_key(contest_id)).await;
    state.cache.delete(&obsolete_key(contest_id)).await;
    info!(contest_id, "Contest deleted");

    Ok(())
}
