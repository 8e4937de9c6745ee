//! Dead-letter consumers: the explicit give-up path. Any task or result
//! that exhausted normal processing forces its submission to Terminated,
//! and the dead letter is acknowledged regardless of outcome.

use common::result::JudgeResultMessage;
use common::task::JudgeTask;
use tracing::{error, info, warn};

use super::complete_grading;
use crate::error::Result;
use crate::state::AppState;

const DEAD_TASK_LOG: &str = "One or more of the grading tasks failed to complete";
const DEAD_RESULT_LOG: &str = "One or more of the grading results failed to process";

pub async fn run_dead_task_consumer(state: AppState) -> Result<()> {
    let consumer = state
        .broker
        .consumer::<JudgeTask>(&state.queues.dead_tasks, 1)?;
    info!(queue = %state.queues.dead_tasks, "Starting dead task consumer");

    loop {
        let delivery = consumer.recv().await;
        match delivery.payload.submission_id() {
            Some(submission_id) => {
                terminate(&state, submission_id, DEAD_TASK_LOG).await;
            }
            None => {
                // Checker compilation has no submission to resolve; the
                // problem simply stays checkerless.
                warn!(
                    message_id = delivery.message_id(),
                    kind = delivery.payload.kind_name(),
                    "Dead-lettered task without a submission"
                );
            }
        }
        delivery.ack();
    }
}

pub async fn run_dead_result_consumer(state: AppState) -> Result<()> {
    let consumer = state
        .broker
        .consumer::<JudgeResultMessage>(&state.queues.dead_results, 1)?;
    info!(queue = %state.queues.dead_results, "Starting dead result consumer");

    loop {
        let delivery = consumer.recv().await;
        match delivery.payload.submission_id() {
            Some(submission_id) => {
                terminate(&state, submission_id, DEAD_RESULT_LOG).await;
            }
            None => {
                warn!(
                    message_id = delivery.message_id(),
                    "Dead-lettered result without a submission"
                );
            }
        }
        delivery.ack();
    }
}

async fn terminate(state: &AppState, submission_id: &str, log: &str) {
    if let Err(e) = complete_grading(state, submission_id, Some(log)).await {
        error!(submission_id, error = %e, "Failed to terminate submission from dead letter");
    }
}
