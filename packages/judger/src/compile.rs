//! Compilation of submissions and problem checkers.

use std::sync::Arc;

use common::language::{Constraints, LanguageConfig};
use common::result::{CheckerCompileResult, CompileResult};
use common::storage::{Bucket, ObjectStore};
use common::task::ObjectRef;
use tracing::{debug, info};

use crate::error::JudgerError;
use crate::sandbox::{Sandbox, SandboxTask};

const COMPILE_LOG_FILE: &str = "log.txt";
const SANDBOX_PATH: &str = "/bin:/usr/local/bin:/usr/bin";

/// Checkers are always built with the same toolchain, independent of the
/// submission language. testlib.h targets C++17.
const CHECKER_COMPILE_ARGV: &[&str] = &[
    "/usr/bin/g++",
    "-O2",
    "-w",
    "-fmax-errors=3",
    "-std=c++17",
    "checker.cpp",
    "-lm",
    "-o",
    "checker",
];

fn checker_compile_constraints() -> Constraints {
    Constraints {
        time_ms: Some(10_000),
        memory_kb: Some(262_144),
        total_storage_kb: Some(262_144),
        processes: Some(5),
    }
}

async fn read_compile_log(workdir: &std::path::Path) -> String {
    match tokio::fs::read(workdir.join(COMPILE_LOG_FILE)).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Compile a submission inside an already-initialized box and persist the
/// produced binary under the submission id.
pub async fn compile_submission(
    sandbox: &dyn Sandbox,
    storage: &Arc<dyn ObjectStore>,
    config: &LanguageConfig,
    slot: u32,
    submission_id: &str,
    source: &str,
    constraints: &Constraints,
) -> Result<CompileResult, JudgerError> {
    let workdir = sandbox.workdir(slot);
    tokio::fs::write(workdir.join(&config.src_file), source).await?;

    let mut task = SandboxTask::new(config.compile_argv(), *constraints);
    task.stderr = Some(COMPILE_LOG_FILE.into());
    task.env = vec![("PATH".into(), SANDBOX_PATH.into())];

    let outcome = sandbox.run(slot, &task).await?;
    debug!(submission_id, slot, ?outcome, "Compilation finished");

    if !outcome.is_succeeded() {
        return Ok(CompileResult::Failed {
            log: read_compile_log(&workdir).await,
        });
    }

    let binary = tokio::fs::read(workdir.join(&config.binary_file)).await?;
    let version = storage.put(Bucket::Binaries, submission_id, &binary).await?;
    info!(submission_id, version, "Stored submission binary");

    Ok(CompileResult::Succeeded)
}

/// Compile a problem's testlib checker and persist it under the problem id.
pub async fn compile_checker(
    sandbox: &dyn Sandbox,
    storage: &Arc<dyn ObjectStore>,
    slot: u32,
    problem_id: &str,
    source: &str,
    testlib_path: &str,
) -> Result<CheckerCompileResult, JudgerError> {
    let workdir = sandbox.workdir(slot);
    tokio::fs::write(workdir.join("checker.cpp"), source).await?;
    tokio::fs::copy(testlib_path, workdir.join("testlib.h")).await?;

    let argv = CHECKER_COMPILE_ARGV.iter().map(|s| s.to_string()).collect();
    let mut task = SandboxTask::new(argv, checker_compile_constraints());
    task.stderr = Some(COMPILE_LOG_FILE.into());
    task.env = vec![("PATH".into(), SANDBOX_PATH.into())];

    let outcome = sandbox.run(slot, &task).await?;
    debug!(problem_id, slot, ?outcome, "Checker compilation finished");

    if !outcome.is_succeeded() {
        return Ok(CheckerCompileResult::Failed {
            log: read_compile_log(&workdir).await,
        });
    }

    let binary = tokio::fs::read(workdir.join("checker")).await?;
    let version_id = storage.put(Bucket::Checkers, problem_id, &binary).await?;
    info!(problem_id, version_id, "Stored problem checker");

    Ok(CheckerCompileResult::Succeeded {
        checker: ObjectRef {
            object_name: problem_id.to_string(),
            version_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxOutcome;
    use crate::sandbox::fake::FakeSandbox;
    use common::LanguageRegistry;
    use common::language::Language;
    use common::storage::filesystem::FilesystemObjectStore;
    use std::fs;

    async fn store() -> (tempfile::TempDir, Arc<dyn ObjectStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path().to_path_buf(), 64 * 1024 * 1024)
            .await
            .unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn successful_compile_stores_binary() {
        let registry = LanguageRegistry::builtin();
        let config = registry.get(Language::Python).clone();
        let binary_file = config.binary_file.clone();

        let sandbox = FakeSandbox::new(move |workdir, task| {
            // "Compilation" for an interpreted language is a copy.
            assert_eq!(task.argv[0], "/usr/bin/cp");
            fs::copy(workdir.join("program.py"), workdir.join(&binary_file)).unwrap();
            Ok(FakeSandbox::succeeded(40))
        });
        sandbox.init(1).await.unwrap();

        let (_dir, storage) = store().await;
        let result = compile_submission(
            &sandbox,
            &storage,
            &config,
            1,
            "sub-1",
            "print(42)",
            &config.compile_constraints,
        )
        .await
        .unwrap();

        assert!(matches!(result, CompileResult::Succeeded));
        let stored = storage.get_latest(Bucket::Binaries, "sub-1").await.unwrap();
        assert_eq!(stored, b"print(42)");
    }

    #[tokio::test]
    async fn failed_compile_returns_log() {
        let registry = LanguageRegistry::builtin();
        let config = registry.get(Language::Cpp).clone();

        let sandbox = FakeSandbox::new(|workdir, _task| {
            fs::write(workdir.join("log.txt"), "error: expected ';'").unwrap();
            Ok(SandboxOutcome::RuntimeError { exit_code: 1 })
        });
        sandbox.init(2).await.unwrap();

        let (_dir, storage) = store().await;
        let result = compile_submission(
            &sandbox,
            &storage,
            &config,
            2,
            "sub-2",
            "int main( {",
            &config.compile_constraints,
        )
        .await
        .unwrap();

        match result {
            CompileResult::Failed { log } => assert!(log.contains("expected ';'")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn checker_compile_returns_versioned_ref() {
        let testlib = tempfile::NamedTempFile::new().unwrap();
        fs::write(testlib.path(), "// testlib").unwrap();
        let testlib_path = testlib.path().to_string_lossy().into_owned();

        let sandbox = FakeSandbox::new(|workdir, task| {
            assert!(task.argv.contains(&"checker.cpp".to_string()));
            assert!(workdir.join("testlib.h").exists());
            fs::write(workdir.join("checker"), b"\x7fELF").unwrap();
            Ok(FakeSandbox::succeeded(900))
        });
        sandbox.init(3).await.unwrap();

        let (_dir, storage) = store().await;
        let result = compile_checker(&sandbox, &storage, 3, "prob-1", "// checker", &testlib_path)
            .await
            .unwrap();

        match result {
            CheckerCompileResult::Succeeded { checker } => {
                assert_eq!(checker.object_name, "prob-1");
                let stored = storage
                    .get(Bucket::Checkers, "prob-1", &checker.version_id)
                    .await
                    .unwrap();
                assert_eq!(stored, b"\x7fELF");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
