//! Submission intake and rejudging.

use chrono::Utc;
use common::language::Language;
use common::task::JudgeTask;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::lock_for_update;
use crate::entity::{problem, submission};
use crate::error::{Result, ServiceError};
use crate::state::AppState;

pub struct NewSubmission {
    pub problem_id: String,
    pub contest_id: Option<String>,
    pub team_id: Option<String>,
    pub user_id: String,
    pub language: Language,
    pub source: String,
}

/// Insert a Compiling submission and publish its Compile task.
pub async fn create_submission(state: &AppState, new: NewSubmission) -> Result<String> {
    problem::Entity::find_by_id(&new.problem_id)
        .one(&state.db)
        .await?
        .ok_or(ServiceError::NotFound("problem"))?;

    let submission_id = Uuid::new_v4().to_string();
    let row = submission::ActiveModel {
        id: Set(submission_id.clone()),
        problem_id: Set(new.problem_id),
        contest_id: Set(new.contest_id),
        team_id: Set(new.team_id),
        user_id: Set(new.user_id),
        language: Set(new.language.to_string()),
        source: Set(new.source.clone()),
        status: Set(common::SubmissionStatus::Compiling),
        generation: Set(0),
        graded_cases: Set(None),
        testcases: Set(json!([])),
        score: Set(None),
        penalty: Set(None),
        log: Set(None),
        created_at: Set(Utc::now()),
    };
    row.insert(&state.db).await?;

    publish_compile_task(state, &submission_id, 0, new.language, &new.source)?;
    info!(submission_id, "Submission created");

    Ok(submission_id)
}

/// Re-enter the pipeline from a terminal state, superseding any stale
/// in-flight results by bumping the generation.
pub async fn rejudge_submission(state: &AppState, submission_id: &str) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let sub = lock_for_update(submission::Entity::find_by_id(submission_id), backend)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("submission"))?;

    if !sub.status.is_final() {
        return Err(ServiceError::InvalidState(format!(
            "submission {submission_id} is still {}, cannot rejudge",
            sub.status
        )));
    }

    let language: Language = sub
        .language
        .parse()
        .map_err(ServiceError::InvalidState)?;
    let generation = sub.generation + 1;
    let source = sub.source.clone();

    let update = submission::ActiveModel {
        id: Set(sub.id),
        status: Set(common::SubmissionStatus::Compiling),
        generation: Set(generation),
        graded_cases: Set(None),
        testcases: Set(json!([])),
        score: Set(None),
        penalty: Set(None),
        log: Set(None),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;

    publish_compile_task(state, submission_id, generation, language, &source)?;
    info!(submission_id, generation, "Submission queued for rejudge");

    Ok(())
}

fn publish_compile_task(
    state: &AppState,
    submission_id: &str,
    generation: i32,
    language: Language,
    source: &str,
) -> Result<()> {
    let task = JudgeTask::Compile {
        submission_id: submission_id.to_string(),
        generation,
        language,
        source: source.to_string(),
        constraints: state.registry.get(language).compile_constraints,
    };
    state.broker.publish(&state.queues.tasks, &task)?;
    Ok(())
}
