//! Result-handler consumer: drives the submission grading state machine
//! from worker result messages.

use common::SubmissionStatus;
use common::language::Language;
use common::result::{CheckerCompileResult, CompileResult, GradeResult, JudgeResultMessage};
use common::task::{JudgeTask, ObjectRef, TestcasePair};
use sea_orm::sea_query::Condition;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{error, info, warn};

use crate::entity::submission::TestcaseSlot;
use crate::entity::{contest, problem, submission};
use crate::error::{Result, ServiceError};
use crate::services::lock_for_update;
use crate::services::scoring::{self, compute_penalty, compute_score};
use crate::state::AppState;

/// Consume judge results from the result queue.
///
/// Single-threaded: grading state transitions are serialized through one
/// consumer; the per-index slot writes keep duplicate deliveries idempotent.
pub async fn run_judge_result_consumer(state: AppState) -> Result<()> {
    let consumer = state
        .broker
        .consumer::<JudgeResultMessage>(&state.queues.results, 1)?;
    info!(queue = %state.queues.results, "Starting judge result consumer");

    loop {
        let delivery = consumer.recv().await;
        let message = delivery.payload.clone();
        match handle_result(&state, message).await {
            Ok(()) => delivery.ack(),
            Err(e) => {
                error!(
                    message_id = delivery.message_id(),
                    error = %e,
                    "Failed to process judge result"
                );
                delivery.reject(false);
            }
        }
    }
}

async fn handle_result(state: &AppState, message: JudgeResultMessage) -> Result<()> {
    match message {
        JudgeResultMessage::Compile {
            submission_id,
            generation,
            result,
        } => handle_compile_result(state, &submission_id, generation, result).await,
        JudgeResultMessage::CompileChecker { problem_id, result } => {
            handle_checker_result(state, &problem_id, result).await
        }
        JudgeResultMessage::Grade {
            submission_id,
            generation,
            testcase_index,
            result,
        } => handle_grading_result(state, &submission_id, generation, testcase_index, result).await,
    }
}

async fn handle_compile_result(
    state: &AppState,
    submission_id: &str,
    generation: i32,
    result: CompileResult,
) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let Some(sub) = lock_for_update(submission::Entity::find_by_id(submission_id), backend)
        .one(&txn)
        .await?
    else {
        warn!(submission_id, "Compile result for unknown submission");
        return Ok(());
    };

    if sub.status != SubmissionStatus::Compiling {
        info!(submission_id, status = %sub.status, "Compile result ignored in non-Compiling state");
        return Ok(());
    }
    if sub.generation != generation {
        info!(
            submission_id,
            generation,
            current = sub.generation,
            "Discarding stale-generation compile result"
        );
        return Ok(());
    }

    if let CompileResult::Failed { log } = result {
        let update = submission::ActiveModel {
            id: Set(sub.id),
            status: Set(SubmissionStatus::CompileFailed),
            log: Set(Some(log)),
            ..Default::default()
        };
        update.update(&txn).await?;
        txn.commit().await?;
        info!(submission_id, "Submission failed to compile");
        return Ok(());
    }

    let prob = problem::Entity::find_by_id(&sub.problem_id).one(&txn).await?;

    // Consistency faults terminate deterministically: none of these heal
    // without re-ingesting the problem or recompiling its checker.
    let fault = match &prob {
        None => Some("The submission's problem no longer exists".to_string()),
        Some(p) => {
            let testcases = p.testcase_list()?;
            if testcases.is_empty() {
                Some("The submission's problem has no testcases".to_string())
            } else if p.checker_ref().is_none() {
                Some("The submission's problem has no compiled checker".to_string())
            } else {
                None
            }
        }
    };
    if let Some(log) = fault {
        let update = submission::ActiveModel {
            id: Set(sub.id),
            status: Set(SubmissionStatus::Terminated),
            log: Set(Some(log.clone())),
            ..Default::default()
        };
        update.update(&txn).await?;
        txn.commit().await?;
        warn!(submission_id, log, "Submission terminated before grading");
        return Ok(());
    }

    let prob = prob.ok_or(ServiceError::NotFound("problem"))?;
    let testcases = prob.testcase_list()?;
    let checker = prob
        .checker_ref()
        .ok_or(ServiceError::NotFound("checker"))?;
    let language: Language = sub.language.parse().map_err(ServiceError::InvalidState)?;
    let constraints = prob.constraint_limits()?;

    let slots: Vec<TestcaseSlot> = (0..testcases.len()).map(|_| TestcaseSlot::default()).collect();
    let update = submission::ActiveModel {
        id: Set(sub.id.clone()),
        status: Set(SubmissionStatus::Grading),
        graded_cases: Set(Some(0)),
        testcases: Set(serde_json::to_value(slots)?),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;

    // Fan out one Grade task per testcase. Tasks are published after the
    // commit; a crash between the two leaves the submission Grading until
    // the dead-letter path resolves it.
    for (index, tc) in testcases.iter().enumerate() {
        let task = JudgeTask::Grade {
            submission_id: sub.id.clone(),
            generation,
            problem_id: sub.problem_id.clone(),
            testcase_index: index,
            language,
            constraints,
            testcase: TestcasePair {
                input: ObjectRef {
                    object_name: format!("{}/{}", sub.problem_id, tc.input.name),
                    version_id: tc.input.version_id.clone(),
                },
                output: ObjectRef {
                    object_name: format!("{}/{}", sub.problem_id, tc.output.name),
                    version_id: tc.output.version_id.clone(),
                },
            },
            checker: checker.clone(),
        };
        state.broker.publish(&state.queues.tasks, &task)?;
    }
    info!(
        submission_id,
        testcases = testcases.len(),
        "Submission entered grading"
    );

    Ok(())
}

async fn handle_checker_result(
    state: &AppState,
    problem_id: &str,
    result: CheckerCompileResult,
) -> Result<()> {
    match result {
        CheckerCompileResult::Succeeded { checker } => {
            let Some(prob) = problem::Entity::find_by_id(problem_id).one(&state.db).await? else {
                warn!(problem_id, "Checker result for unknown problem");
                return Ok(());
            };
            let update = problem::ActiveModel {
                id: Set(prob.id),
                checker: Set(Some(serde_json::to_value(checker)?)),
                ..Default::default()
            };
            update.update(&state.db).await?;
            info!(problem_id, "Checker attached to problem");
        }
        CheckerCompileResult::Failed { log } => {
            warn!(problem_id, log, "Checker compilation failed");
        }
    }
    Ok(())
}

async fn handle_grading_result(
    state: &AppState,
    submission_id: &str,
    generation: i32,
    testcase_index: usize,
    result: GradeResult,
) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let Some(sub) = lock_for_update(submission::Entity::find_by_id(submission_id), backend)
        .one(&txn)
        .await?
    else {
        warn!(submission_id, "Grade result for unknown submission");
        return Ok(());
    };

    if sub.status != SubmissionStatus::Grading {
        info!(submission_id, status = %sub.status, "Grade result ignored in non-Grading state");
        return Ok(());
    }
    if sub.generation != generation {
        info!(
            submission_id,
            generation,
            current = sub.generation,
            "Discarding stale-generation grade result"
        );
        return Ok(());
    }

    let mut slots = sub.testcase_slots()?;
    let Some(slot) = slots.get_mut(testcase_index) else {
        warn!(submission_id, testcase_index, "Grade result index out of range");
        return Ok(());
    };
    if slot.result.is_some() {
        // Duplicate delivery; the count was already incremented for this
        // index, so writing again would complete grading twice.
        info!(submission_id, testcase_index, "Duplicate grade result ignored");
        return Ok(());
    }
    slot.result = Some(result);

    let graded = sub.graded_cases.unwrap_or(0) + 1;
    let total = slots.len();
    let update = submission::ActiveModel {
        id: Set(sub.id.clone()),
        graded_cases: Set(Some(graded)),
        testcases: Set(serde_json::to_value(slots)?),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;

    if graded as usize == total {
        complete_grading(state, submission_id, None).await?;
    }
    Ok(())
}

/// Finalize a submission: Graded with score/penalty on the happy path, or
/// Terminated with `failure` when the dead-letter path gives up on it.
/// No-op for submissions already in a terminal state.
pub(crate) async fn complete_grading(
    state: &AppState,
    submission_id: &str,
    failure: Option<&str>,
) -> Result<()> {
    let txn = state.db.begin().await?;
    let backend = txn.get_database_backend();

    let Some(sub) = lock_for_update(submission::Entity::find_by_id(submission_id), backend)
        .one(&txn)
        .await?
    else {
        warn!(submission_id, "Cannot finalize unknown submission");
        return Ok(());
    };
    if sub.status.is_final() {
        info!(submission_id, status = %sub.status, "Submission already finalized");
        return Ok(());
    }

    let slots = sub.testcase_slots()?;
    let complete = sub.status == SubmissionStatus::Grading
        && !slots.is_empty()
        && slots.iter().all(|slot| slot.result.is_some());

    if failure.is_some() || !complete {
        let log = failure
            .unwrap_or("One or more of the grading tasks failed to complete")
            .to_string();
        let update = submission::ActiveModel {
            id: Set(sub.id),
            status: Set(SubmissionStatus::Terminated),
            log: Set(Some(log.clone())),
            ..Default::default()
        };
        update.update(&txn).await?;
        txn.commit().await?;
        warn!(submission_id, log, "Submission terminated");
        return Ok(());
    }

    let prob = problem::Entity::find_by_id(&sub.problem_id)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("problem"))?;

    let passes = slots
        .iter()
        .filter_map(|slot| slot.result.as_ref())
        .filter(|r| r.status.is_accepted())
        .count();
    let score = compute_score(prob.partials, passes, slots.len());

    let penalty = match (&sub.contest_id, &sub.team_id) {
        (Some(contest_id), Some(team_id)) => {
            let contest = contest::Entity::find_by_id(contest_id)
                .one(&txn)
                .await?
                .ok_or(ServiceError::NotFound("contest"))?;
            let prior_rejected = submission::Entity::find()
                .filter(submission::Column::ProblemId.eq(&sub.problem_id))
                .filter(submission::Column::TeamId.eq(team_id))
                .filter(submission::Column::CreatedAt.lt(sub.created_at))
                .filter(submission::Column::Status.is_in([
                    SubmissionStatus::Graded,
                    SubmissionStatus::CompileFailed,
                    SubmissionStatus::Terminated,
                ]))
                .filter(
                    Condition::any()
                        .add(submission::Column::Score.is_null())
                        .add(submission::Column::Score.ne(100.0)),
                )
                .count(&txn)
                .await?;
            compute_penalty(score, prior_rejected, sub.created_at, contest.start_time)
        }
        _ => 0.0,
    };

    let update = submission::ActiveModel {
        id: Set(sub.id.clone()),
        status: Set(SubmissionStatus::Graded),
        score: Set(Some(score)),
        penalty: Set(Some(penalty)),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;
    info!(submission_id, score, penalty, "Submission graded");

    if let (Some(contest_id), Some(team_id)) = (&sub.contest_id, &sub.team_id) {
        scoring::apply_score_update(
            &state.db,
            state.cache.store(),
            contest_id,
            team_id,
            &sub.problem_id,
            score,
            penalty,
            sub.created_at,
        )
        .await?;
    }

    Ok(())
}
