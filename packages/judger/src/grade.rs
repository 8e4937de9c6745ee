//! Grading of one testcase run.

use std::path::Path;
use std::sync::Arc;

use common::language::{Constraints, LanguageConfig};
use common::result::{GradeResult, GradeStatus};
use common::storage::{Bucket, ObjectStore};
use common::task::{ObjectRef, TestcasePair};
use tracing::debug;

use crate::error::JudgerError;
use crate::sandbox::{Sandbox, SandboxOutcome, SandboxTask};

const INPUT_FILE: &str = "in.txt";
const OUTPUT_FILE: &str = "out.txt";
const ANSWER_FILE: &str = "ans.txt";
const CHECKER_FILE: &str = "checker";

fn checker_run_constraints() -> Constraints {
    Constraints {
        time_ms: Some(10_000),
        memory_kb: Some(262_144),
        total_storage_kb: Some(262_144),
        processes: Some(5),
    }
}

async fn make_executable(path: &Path) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

fn outcome_to_failure(outcome: SandboxOutcome) -> GradeResult {
    match outcome {
        SandboxOutcome::TimeLimitExceeded => {
            GradeResult::verdict_only(GradeStatus::TimeLimitExceeded, "Time limit exceeded")
        }
        SandboxOutcome::MemoryLimitExceeded => {
            GradeResult::verdict_only(GradeStatus::MemoryLimitExceeded, "Memory limit exceeded")
        }
        SandboxOutcome::RuntimeError { exit_code } => GradeResult::verdict_only(
            GradeStatus::RuntimeError,
            format!("Process exited with code {exit_code}"),
        ),
        SandboxOutcome::SystemError { message } => {
            GradeResult::verdict_only(GradeStatus::SystemError, message)
        }
        SandboxOutcome::Succeeded { .. } => {
            // Callers only reach here for non-success outcomes.
            GradeResult::verdict_only(GradeStatus::SystemError, "unexpected sandbox outcome")
        }
    }
}

/// Run one testcase against a previously compiled binary, then run the
/// problem's checker over the produced output.
///
/// The checker follows the testlib convention: it receives
/// `(input, output, answer)` and exits 0 to accept.
#[allow(clippy::too_many_arguments)]
pub async fn grade_submission(
    sandbox: &dyn Sandbox,
    storage: &Arc<dyn ObjectStore>,
    config: &LanguageConfig,
    slot: u32,
    submission_id: &str,
    constraints: &Constraints,
    testcase: &TestcasePair,
    checker: &ObjectRef,
) -> Result<GradeResult, JudgerError> {
    let workdir = sandbox.workdir(slot);
    let binary_path = workdir.join(&config.binary_file);

    storage
        .fetch_latest_to_file(Bucket::Binaries, submission_id, &binary_path)
        .await?;
    storage
        .fetch_to_file(
            Bucket::Testcases,
            &testcase.input.object_name,
            &testcase.input.version_id,
            &workdir.join(INPUT_FILE),
        )
        .await?;
    storage
        .fetch_to_file(
            Bucket::Testcases,
            &testcase.output.object_name,
            &testcase.output.version_id,
            &workdir.join(ANSWER_FILE),
        )
        .await?;
    make_executable(&binary_path).await?;

    let effective = constraints.merged_with(&config.run_constraints);
    let mut run = SandboxTask::new(config.execute_argv(), effective);
    run.stdin = Some(INPUT_FILE.into());
    run.stdout = Some(OUTPUT_FILE.into());

    let outcome = sandbox.run(slot, &run).await?;
    debug!(submission_id, slot, ?outcome, "Testcase run finished");

    let (time_ms, wall_time_ms, memory_kb) = match outcome {
        SandboxOutcome::Succeeded {
            time_ms,
            wall_time_ms,
            memory_kb,
        } => (time_ms, wall_time_ms, memory_kb),
        other => return Ok(outcome_to_failure(other)),
    };

    let checker_path = workdir.join(CHECKER_FILE);
    storage
        .fetch_to_file(
            Bucket::Checkers,
            &checker.object_name,
            &checker.version_id,
            &checker_path,
        )
        .await?;
    make_executable(&checker_path).await?;

    let check = SandboxTask::new(
        vec![
            format!("./{CHECKER_FILE}"),
            INPUT_FILE.into(),
            OUTPUT_FILE.into(),
            ANSWER_FILE.into(),
        ],
        checker_run_constraints(),
    );
    let check_outcome = sandbox.run(slot, &check).await?;
    debug!(submission_id, slot, ?check_outcome, "Checker finished");

    let (status, message) = match check_outcome {
        SandboxOutcome::Succeeded { .. } => (GradeStatus::Accepted, "Submission accepted"),
        SandboxOutcome::RuntimeError { .. } => (GradeStatus::WrongAnswer, "Wrong answer"),
        _ => (GradeStatus::SystemError, "Checker failed to run"),
    };

    Ok(GradeResult {
        status,
        time_ms: Some(time_ms),
        wall_time_ms: Some(wall_time_ms),
        memory_kb: Some(memory_kb),
        message: message.into(),
    })
}
