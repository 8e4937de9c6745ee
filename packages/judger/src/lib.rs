pub mod compile;
pub mod config;
pub mod error;
pub mod grade;
pub mod sandbox;
pub mod worker;

pub use config::JudgerConfig;
pub use error::JudgerError;
pub use sandbox::{Sandbox, SandboxError, SandboxOutcome, SandboxTask};
pub use worker::JudgeWorker;
