//! Problem management: the rows and blobs the ingestion flow emits, plus
//! teardown that keeps scores and caches consistent.

use chrono::Utc;
use common::language::Constraints;
use common::storage::Bucket;
use common::task::JudgeTask;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::contest::problem_list_key;
use super::lock_for_update;
use super::ranklist::mark_ranklist_obsolete;
use super::scoring::recalculate_team_total;
use crate::entity::problem::{self, ProblemTestcase};
use crate::entity::{submission, team_score};
use crate::error::{Result, ServiceError};
use crate::state::AppState;

pub struct NewProblem {
    pub contest_id: String,
    pub name: String,
    pub context: String,
    pub input_format: String,
    pub output_format: String,
    pub partials: bool,
    pub constraints: Constraints,
    /// Testcase files must already live in the testcases bucket under
    /// "{problem_id}/{name}" before grading can run.
    pub testcases: Vec<ProblemTestcase>,
}

pub async fn fetch_problem(state: &AppState, problem_id: &str) -> Result<problem::Model> {
    problem::Entity::find_by_id(problem_id)
        .one(&state.db)
        .await?
        .ok_or(ServiceError::NotFound("problem"))
}

/// Insert a new problem row. The checker column stays NULL until a
/// CompileChecker result arrives.
pub async fn create_problem(state: &AppState, new: NewProblem) -> Result<String> {
    let problem_id = Uuid::new_v4().to_string();
    let contest_id = new.contest_id.clone();

    let row = problem::ActiveModel {
        id: Set(problem_id.clone()),
        contest_id: Set(new.contest_id),
        name: Set(new.name),
        context: Set(new.context),
        input_format: Set(new.input_format),
        output_format: Set(new.output_format),
        partials: Set(new.partials),
        constraints: Set(serde_json::to_value(new.constraints)?),
        testcases: Set(serde_json::to_value(new.testcases)?),
        checker: Set(None),
        created_at: Set(Utc::now()),
    };
    row.insert(&state.db).await?;

    state.cache.delete(&problem_list_key(&contest_id)).await;
    info!(problem_id, contest_id, "Problem created");

    Ok(problem_id)
}

/// Overwrite an existing problem's statement, constraints and testcases in
/// place, then drop the blobs the new version no longer references. The
/// compiled checker is invalidated; callers are expected to queue a fresh
/// checker compilation afterwards.
pub async fn replace_problem(state: &AppState, problem_id: &str, new: NewProblem) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let existing = lock_for_update(problem::Entity::find_by_id(problem_id), backend)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("problem"))?;

    let old_files = testcase_file_names(&existing.testcase_list()?);
    let new_files = testcase_file_names(&new.testcases);
    let contest_id = existing.contest_id.clone();

    let update = problem::ActiveModel {
        id: Set(existing.id),
        name: Set(new.name),
        context: Set(new.context),
        input_format: Set(new.input_format),
        output_format: Set(new.output_format),
        partials: Set(new.partials),
        constraints: Set(serde_json::to_value(new.constraints)?),
        testcases: Set(serde_json::to_value(new.testcases)?),
        checker: Set(None),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;

    for name in old_files {
        if !new_files.contains(&name) {
            delete_blob(state, Bucket::Testcases, &format!("{problem_id}/{name}")).await;
        }
    }

    state.cache.delete(&problem_list_key(&contest_id)).await;
    info!(problem_id, contest_id, "Problem replaced");

    Ok(())
}

/// Publish the CompileChecker task for a problem's checker source.
pub fn queue_checker_compilation(
    state: &AppState,
    problem_id: &str,
    source: &str,
) -> Result<()> {
    let task = JudgeTask::CompileChecker {
        problem_id: problem_id.to_string(),
        source: source.to_string(),
    };
    state.broker.publish(&state.queues.tasks, &task)?;
    Ok(())
}

/// Remove a problem and everything derived from it: its submissions, its
/// entries in every team's score maps (totals refolded), its blobs and the
/// contest's cached problem list.
pub async fn delete_problem(state: &AppState, problem_id: &str) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let prob = lock_for_update(problem::Entity::find_by_id(problem_id), backend)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("problem"))?;

    let contest_id = prob.contest_id.clone();
    let files = testcase_file_names(&prob.testcase_list()?);

    submission::Entity::delete_many()
        .filter(submission::Column::ProblemId.eq(problem_id))
        .exec(&txn)
        .await?;

    let rows = team_score::Entity::find()
        .filter(team_score::Column::ContestId.eq(&contest_id))
        .all(&txn)
        .await?;
    for row in rows {
        let mut scores = row.score_map();
        if scores.remove(problem_id).is_none() {
            continue;
        }
        let mut times = row.time_map();
        let mut penalties = row.penalty_map();
        times.remove(problem_id);
        penalties.remove(problem_id);

        let update = team_score::ActiveModel {
            contest_id: Set(row.contest_id),
            team_id: Set(row.team_id),
            scores: Set(json!(scores)),
            times: Set(json!(times)),
            penalties: Set(json!(penalties)),
            ..Default::default()
        };
        update.update(&txn).await?;
    }
    recalculate_team_total(&txn, &contest_id, None).await?;

    problem::Entity::delete_by_id(problem_id).exec(&txn).await?;
    txn.commit().await?;

    for name in files {
        delete_blob(state, Bucket::Testcases, &format!("{problem_id}/{name}")).await;
    }
    delete_blob(state, Bucket::Checkers, problem_id).await;

    state.cache.delete(&problem_list_key(&contest_id)).await;
    mark_ranklist_obsolete(state.cache.store(), &contest_id).await;
    info!(problem_id, contest_id, "Problem deleted");

    Ok(())
}

fn testcase_file_names(testcases: &[ProblemTestcase]) -> Vec<String> {
    testcases
        .iter()
        .flat_map(|tc| [tc.input.name.clone(), tc.output.name.clone()])
        .collect()
}

/// Blob deletion runs after commit; a failure here leaves an orphaned blob,
/// not an inconsistent database.
async fn delete_blob(state: &AppState, bucket: Bucket, name: &str) {
    if let Err(e) = state.storage.delete_all(bucket, name).await {
        warn!(bucket = ?bucket, name, error = %e, "Failed to delete stored object");
    }
}
