//! isolate(1)-backed sandbox.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::Constraints;
use tokio::fs;
use tokio::process::Command;

use super::{Sandbox, SandboxError, SandboxOutcome, SandboxTask};
use crate::config::JudgerConfig;

pub struct IsolateSandbox {
    bin: String,
    box_root: PathBuf,
}

impl IsolateSandbox {
    pub fn new(config: &JudgerConfig) -> Self {
        Self {
            bin: config.isolate_bin.clone(),
            box_root: PathBuf::from(&config.box_root),
        }
    }

    fn meta_path(slot: u32) -> PathBuf {
        std::env::temp_dir().join(format!("gavel-isolate-{slot}.meta"))
    }
}

fn add_constraint_args(command: &mut Command, constraints: &Constraints) {
    if let Some(time_ms) = constraints.time_ms {
        let time_secs = time_ms as f64 / 1000.0;
        command.arg(format!("--time={time_secs}"));
        // Wall clock gets headroom over CPU time so an idle-but-alive
        // process is still killed by TO rather than hanging the box.
        command.arg(format!("--wall-time={}", time_secs * 2.0 + 1.0));
    }
    if let Some(memory_kb) = constraints.memory_kb {
        command.arg(format!("--cg-mem={memory_kb}"));
    }
    if let Some(storage_kb) = constraints.total_storage_kb {
        command.arg(format!("--fsize={storage_kb}"));
    }
    if let Some(processes) = constraints.processes {
        command.arg(format!("--processes={processes}"));
    }
}

#[derive(Debug, Default)]
struct MetaFile {
    status: String,
    message: String,
    exit_code: Option<i32>,
    signal: Option<i32>,
    time_ms: u64,
    wall_time_ms: u64,
    memory_kb: u64,
    oom_killed: bool,
}

fn parse_meta(content: &str) -> MetaFile {
    let mut raw = HashMap::<&str, &str>::new();
    let mut oom_killed = false;

    for line in content.lines() {
        if line.trim() == "cg-oom-killed" {
            oom_killed = true;
        } else if let Some((key, value)) = line.split_once(':') {
            if key.trim() == "cg-oom-killed" {
                oom_killed = value.trim() != "0";
            } else {
                raw.insert(key.trim(), value.trim());
            }
        }
    }

    let parse_i32 = |key: &str| raw.get(key).and_then(|v| v.parse::<i32>().ok());
    let parse_secs = |key: &str| {
        raw.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0).round() as u64)
            .unwrap_or(0)
    };

    MetaFile {
        status: raw.get("status").unwrap_or(&"").to_string(),
        message: raw.get("message").unwrap_or(&"").to_string(),
        exit_code: parse_i32("exitcode"),
        signal: parse_i32("exitsig"),
        time_ms: parse_secs("time"),
        wall_time_ms: parse_secs("time-wall"),
        memory_kb: raw
            .get("cg-mem")
            .or_else(|| raw.get("max-rss"))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0),
        oom_killed,
    }
}

fn classify(meta: &MetaFile) -> SandboxOutcome {
    match meta.status.as_str() {
        "TO" => SandboxOutcome::TimeLimitExceeded,
        "SG" if meta.oom_killed => SandboxOutcome::MemoryLimitExceeded,
        "SG" => SandboxOutcome::RuntimeError {
            exit_code: meta.signal.map(|s| 128 + s).unwrap_or(-1),
        },
        "RE" => SandboxOutcome::RuntimeError {
            exit_code: meta.exit_code.unwrap_or(-1),
        },
        "XX" => SandboxOutcome::SystemError {
            message: meta.message.clone(),
        },
        _ => SandboxOutcome::Succeeded {
            time_ms: meta.time_ms,
            wall_time_ms: meta.wall_time_ms,
            memory_kb: meta.memory_kb,
        },
    }
}

async fn read_meta(meta_path: &Path) -> Result<MetaFile, SandboxError> {
    let content = fs::read_to_string(meta_path).await.map_err(|err| {
        SandboxError::Execution(format!("failed to read isolate meta file: {err}"))
    })?;
    Ok(parse_meta(&content))
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    async fn init(&self, slot: u32) -> Result<(), SandboxError> {
        let output = Command::new(&self.bin)
            .arg(format!("--box-id={slot}"))
            .arg("--cg")
            .arg("--init")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Initialization(format!("failed to execute isolate --init: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Initialization(format!(
                "isolate --init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    async fn run(&self, slot: u32, task: &SandboxTask) -> Result<SandboxOutcome, SandboxError> {
        if task.argv.is_empty() {
            return Err(SandboxError::Execution(
                "isolate --run requires at least one program argument".to_string(),
            ));
        }

        let meta_path = Self::meta_path(slot);

        let mut command = Command::new(&self.bin);
        command
            .arg(format!("--box-id={slot}"))
            .arg("--cg")
            .arg(format!("--meta={}", meta_path.to_string_lossy()));

        add_constraint_args(&mut command, &task.constraints);

        for (var, value) in &task.env {
            command.arg(format!("--env={var}={value}"));
        }
        if let Some(stdin) = &task.stdin {
            command.arg(format!("--stdin={stdin}"));
        }
        if let Some(stdout) = &task.stdout {
            command.arg(format!("--stdout={stdout}"));
        }
        if let Some(stderr) = &task.stderr {
            command.arg(format!("--stderr={stderr}"));
        }

        command.arg("--run").arg("--").args(&task.argv);

        let output = command.output().await.map_err(|err| {
            SandboxError::Execution(format!("failed to execute isolate --run: {err}"))
        })?;

        // isolate exits 0 when the guest succeeded and 1 when the guest
        // failed; anything else is an isolate-internal fault.
        match output.status.code() {
            Some(0) | Some(1) => {
                let meta = read_meta(&meta_path).await?;
                Ok(classify(&meta))
            }
            _ => Err(SandboxError::Unknown(format!(
                "isolate internal error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn destroy(&self, slot: u32) -> Result<(), SandboxError> {
        let output = Command::new(&self.bin)
            .arg(format!("--box-id={slot}"))
            .arg("--cg")
            .arg("--cleanup")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Execution(format!("failed to execute isolate --cleanup: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Execution(format!(
                "isolate --cleanup failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    fn workdir(&self, slot: u32) -> PathBuf {
        self.box_root.join(slot.to_string()).join("box")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_meta_yields_metrics() {
        let meta = parse_meta("time:0.012\ntime-wall:0.034\ncg-mem:1024\nexitcode:0\nstatus:OK\n");
        match classify(&meta) {
            SandboxOutcome::Succeeded {
                time_ms,
                wall_time_ms,
                memory_kb,
            } => {
                assert_eq!(time_ms, 12);
                assert_eq!(wall_time_ms, 34);
                assert_eq!(memory_kb, 1024);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_status_means_success() {
        let meta = parse_meta("time:0.5\ntime-wall:0.6\nmax-rss:2048\nexitcode:0\n");
        assert!(classify(&meta).is_succeeded());
    }

    #[test]
    fn timeout_classified() {
        let meta = parse_meta("status:TO\ntime:2.001\nmessage:Time limit exceeded\n");
        assert_eq!(classify(&meta), SandboxOutcome::TimeLimitExceeded);
    }

    #[test]
    fn oom_signal_classified_as_memory_limit() {
        let meta = parse_meta("status:SG\nexitsig:9\ncg-oom-killed:1\n");
        assert_eq!(classify(&meta), SandboxOutcome::MemoryLimitExceeded);
    }

    #[test]
    fn plain_signal_classified_as_runtime_error() {
        let meta = parse_meta("status:SG\nexitsig:11\n");
        assert_eq!(
            classify(&meta),
            SandboxOutcome::RuntimeError { exit_code: 139 }
        );
    }

    #[test]
    fn nonzero_exit_classified_as_runtime_error() {
        let meta = parse_meta("status:RE\nexitcode:1\ntime:0.004\n");
        assert_eq!(classify(&meta), SandboxOutcome::RuntimeError { exit_code: 1 });
    }

    #[test]
    fn internal_fault_classified_as_system_error() {
        let meta = parse_meta("status:XX\nmessage:box setup failed\n");
        match classify(&meta) {
            SandboxOutcome::SystemError { message } => assert_eq!(message, "box setup failed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn workdir_follows_isolate_layout() {
        let sandbox = IsolateSandbox::new(&JudgerConfig::default());
        assert_eq!(
            sandbox.workdir(3),
            PathBuf::from("/var/local/lib/isolate/3/box")
        );
    }
}
