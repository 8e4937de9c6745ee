//! Sandboxed process execution.

mod error;
pub mod isolate;

#[cfg(test)]
pub(crate) mod fake;

use std::path::PathBuf;

use async_trait::async_trait;
use common::Constraints;

pub use error::SandboxError;
pub use isolate::IsolateSandbox;

/// One command to run inside an initialized box.
///
/// File names are relative to the box's writable directory.
#[derive(Debug, Clone)]
pub struct SandboxTask {
    pub argv: Vec<String>,
    pub constraints: Constraints,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Environment variables made visible to the process.
    pub env: Vec<(String, String)>,
}

impl SandboxTask {
    pub fn new(argv: Vec<String>, constraints: Constraints) -> Self {
        Self {
            argv,
            constraints,
            stdin: None,
            stdout: None,
            stderr: None,
            env: Vec::new(),
        }
    }
}

/// Classified outcome of a sandboxed run.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    Succeeded {
        time_ms: u64,
        wall_time_ms: u64,
        memory_kb: u64,
    },
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError {
        exit_code: i32,
    },
    /// Fault of the sandbox itself, not of the guest program.
    SystemError {
        message: String,
    },
}

impl SandboxOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Manager of a fixed set of numbered sandbox boxes.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Initialize the box for one task. Must be paired with [`destroy`].
    ///
    /// [`destroy`]: Sandbox::destroy
    async fn init(&self, slot: u32) -> Result<(), SandboxError>;

    /// Run one command inside an initialized box.
    async fn run(&self, slot: u32, task: &SandboxTask) -> Result<SandboxOutcome, SandboxError>;

    /// Tear the box down, discarding its filesystem.
    async fn destroy(&self, slot: u32) -> Result<(), SandboxError>;

    /// Host path of the box's writable directory.
    fn workdir(&self, slot: u32) -> PathBuf;
}
