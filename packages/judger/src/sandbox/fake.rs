//! Scriptable sandbox used by unit tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use super::{Sandbox, SandboxError, SandboxOutcome, SandboxTask};

type RunHandler =
    Box<dyn Fn(&Path, &SandboxTask) -> Result<SandboxOutcome, SandboxError> + Send + Sync>;

/// In-memory sandbox whose boxes are plain temp directories and whose runs
/// are scripted by a handler closure.
pub(crate) struct FakeSandbox {
    root: TempDir,
    handler: RunHandler,
}

impl FakeSandbox {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&Path, &SandboxTask) -> Result<SandboxOutcome, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            root: TempDir::new().expect("create fake sandbox root"),
            handler: Box::new(handler),
        }
    }

    pub(crate) fn succeeded(time_ms: u64) -> SandboxOutcome {
        SandboxOutcome::Succeeded {
            time_ms,
            wall_time_ms: time_ms + 3,
            memory_kb: 1024,
        }
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn init(&self, slot: u32) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(self.workdir(slot))
            .await
            .map_err(|e| SandboxError::Initialization(e.to_string()))
    }

    async fn run(&self, slot: u32, task: &SandboxTask) -> Result<SandboxOutcome, SandboxError> {
        (self.handler)(&self.workdir(slot), task)
    }

    async fn destroy(&self, slot: u32) -> Result<(), SandboxError> {
        let dir = self.workdir(slot);
        if dir.exists() {
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| SandboxError::Execution(e.to_string()))?;
        }
        Ok(())
    }

    fn workdir(&self, slot: u32) -> PathBuf {
        self.root.path().join(slot.to_string()).join("box")
    }
}
