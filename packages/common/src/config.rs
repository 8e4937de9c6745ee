use serde::Deserialize;

/// Queue names shared by task producers, workers and the result handler.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueNames {
    /// Tasks (server publishes, workers consume). Default: "judge_tasks".
    #[serde(default = "default_task_queue")]
    pub tasks: String,
    /// Results (workers publish, server consumes). Default: "judge_results".
    #[serde(default = "default_result_queue")]
    pub results: String,
    /// Dead-letter queue for rejected tasks. Default: "dead_tasks".
    #[serde(default = "default_dead_task_queue")]
    pub dead_tasks: String,
    /// Dead-letter queue for rejected results. Default: "dead_results".
    #[serde(default = "default_dead_result_queue")]
    pub dead_results: String,
}

fn default_task_queue() -> String {
    "judge_tasks".into()
}
fn default_result_queue() -> String {
    "judge_results".into()
}
fn default_dead_task_queue() -> String {
    "dead_tasks".into()
}
fn default_dead_result_queue() -> String {
    "dead_results".into()
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            tasks: default_task_queue(),
            results: default_result_queue(),
            dead_tasks: default_dead_task_queue(),
            dead_results: default_dead_result_queue(),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// Base directory of the filesystem object store. Default: "data/objects".
    #[serde(default = "default_storage_dir")]
    pub base_dir: String,
    /// Maximum object size in bytes. Default: 256 MiB.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
}

fn default_storage_dir() -> String {
    "data/objects".into()
}
fn default_max_object_size() -> u64 {
    256 * 1024 * 1024
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_dir: default_storage_dir(),
            max_object_size: default_max_object_size(),
        }
    }
}
