//! Slot-bounded judging worker loop.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::LanguageRegistry;
use common::config::QueueNames;
use common::result::JudgeResultMessage;
use common::storage::ObjectStore;
use common::task::JudgeTask;
use mq::Broker;
use tracing::{error, info, warn};

use crate::compile::{compile_checker, compile_submission};
use crate::config::JudgerConfig;
use crate::error::JudgerError;
use crate::grade::grade_submission;
use crate::sandbox::Sandbox;

/// One judging worker owning a fixed range of sandbox slots.
///
/// The consumer prefetch equals the slot count, so the queue itself
/// back-pressures task intake: the worker never holds more unacknowledged
/// tasks than it has boxes.
pub struct JudgeWorker {
    id: String,
    slots: Mutex<BTreeSet<u32>>,
    slot_count: u32,
    sandbox: Arc<dyn Sandbox>,
    storage: Arc<dyn ObjectStore>,
    registry: Arc<LanguageRegistry>,
    config: JudgerConfig,
}

impl JudgeWorker {
    pub fn new(
        config: JudgerConfig,
        sandbox: Arc<dyn Sandbox>,
        storage: Arc<dyn ObjectStore>,
        registry: Arc<LanguageRegistry>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slots: Mutex::new((1..=config.slots).collect()),
            slot_count: config.slots,
            sandbox,
            storage,
            registry,
            config,
        }
    }

    fn acquire_slot(&self) -> Option<u32> {
        let mut slots = self.slots.lock().expect("slot set mutex poisoned");
        let slot = slots.iter().next().copied()?;
        slots.remove(&slot);
        Some(slot)
    }

    fn release_slot(&self, slot: u32) {
        self.slots.lock().expect("slot set mutex poisoned").insert(slot);
    }

    /// Tear down every owned box. A previous run may have died mid-task and
    /// left boxes initialized.
    async fn destroy_all_boxes(&self) {
        for slot in 1..=self.slot_count {
            if let Err(e) = self.sandbox.destroy(slot).await {
                warn!(worker_id = %self.id, slot, error = %e, "Startup box cleanup failed");
            }
        }
    }

    /// Consume judging tasks until the broker goes away.
    pub async fn run(
        self: Arc<Self>,
        broker: Broker,
        queues: QueueNames,
    ) -> Result<(), JudgerError> {
        self.destroy_all_boxes().await;

        let consumer = broker.consumer::<JudgeTask>(&queues.tasks, self.slot_count as usize)?;
        info!(worker_id = %self.id, slots = self.slot_count, "Judge worker accepting tasks");

        loop {
            let delivery = consumer.recv().await;

            let Some(slot) = self.acquire_slot() else {
                // Prefetch should make this unreachable, but a slot leak
                // must not turn into task loss.
                warn!(worker_id = %self.id, "No sandbox slot available, requeueing task");
                delivery.reject(true);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };

            let worker = Arc::clone(&self);
            let broker = broker.clone();
            let results_queue = queues.results.clone();
            tokio::spawn(async move {
                let task = delivery.payload.clone();
                info!(
                    worker_id = %worker.id,
                    slot,
                    kind = task.kind_name(),
                    submission_id = task.submission_id().unwrap_or("-"),
                    redelivered = delivery.redelivered(),
                    "Processing task"
                );

                match worker.process(slot, task).await {
                    Ok(result) => {
                        if let Err(e) = broker.publish(&results_queue, &result) {
                            error!(worker_id = %worker.id, error = %e, "Failed to publish result");
                            worker.cleanup(slot).await;
                            delivery.reject(false);
                            return;
                        }
                        worker.cleanup(slot).await;
                        delivery.ack();
                    }
                    Err(e) => {
                        error!(worker_id = %worker.id, slot, error = %e, "Task processing failed");
                        worker.cleanup(slot).await;
                        delivery.reject(false);
                    }
                }
            });
        }
    }

    async fn cleanup(&self, slot: u32) {
        if let Err(e) = self.sandbox.destroy(slot).await {
            warn!(slot, error = %e, "Box cleanup failed");
        }
        self.release_slot(slot);
    }

    async fn process(&self, slot: u32, task: JudgeTask) -> Result<JudgeResultMessage, JudgerError> {
        self.sandbox.init(slot).await?;

        match task {
            JudgeTask::Compile {
                submission_id,
                generation,
                language,
                source,
                constraints,
            } => {
                let config = self.registry.get(language);
                let result = compile_submission(
                    self.sandbox.as_ref(),
                    &self.storage,
                    config,
                    slot,
                    &submission_id,
                    &source,
                    &constraints,
                )
                .await?;
                Ok(JudgeResultMessage::Compile {
                    submission_id,
                    generation,
                    result,
                })
            }
            JudgeTask::CompileChecker { problem_id, source } => {
                let result = compile_checker(
                    self.sandbox.as_ref(),
                    &self.storage,
                    slot,
                    &problem_id,
                    &source,
                    &self.config.testlib_path,
                )
                .await?;
                Ok(JudgeResultMessage::CompileChecker { problem_id, result })
            }
            JudgeTask::Grade {
                submission_id,
                generation,
                problem_id: _,
                testcase_index,
                language,
                constraints,
                testcase,
                checker,
            } => {
                let config = self.registry.get(language);
                let result = grade_submission(
                    self.sandbox.as_ref(),
                    &self.storage,
                    config,
                    slot,
                    &submission_id,
                    &constraints,
                    &testcase,
                    &checker,
                )
                .await?;
                Ok(JudgeResultMessage::Grade {
                    submission_id,
                    generation,
                    testcase_index,
                    result,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeSandbox;
    use crate::sandbox::{SandboxError, SandboxOutcome};
    use common::language::{Constraints, Language};
    use common::result::CompileResult;
    use common::storage::{Bucket, filesystem::FilesystemObjectStore};
    use mq::declare_judging_queues;
    use std::fs;

    async fn storage() -> (tempfile::TempDir, Arc<dyn ObjectStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path().to_path_buf(), 64 * 1024 * 1024)
            .await
            .unwrap();
        (dir, Arc::new(store))
    }

    fn judging_broker(names: &QueueNames) -> Broker {
        let broker = Broker::new();
        declare_judging_queues(&broker, names);
        broker
    }

    fn spawn_worker(sandbox: FakeSandbox, storage: Arc<dyn ObjectStore>, broker: &Broker) {
        let config = JudgerConfig {
            slots: 2,
            ..Default::default()
        };
        let worker = Arc::new(JudgeWorker::new(
            config,
            Arc::new(sandbox),
            storage,
            Arc::new(LanguageRegistry::builtin()),
        ));
        tokio::spawn(worker.run(broker.clone(), QueueNames::default()));
    }

    #[tokio::test]
    async fn compile_task_produces_result_message() {
        let names = QueueNames::default();
        let broker = judging_broker(&names);
        let (_dir, store) = storage().await;

        let sandbox = FakeSandbox::new(|workdir, task| {
            assert_eq!(task.argv[0], "/usr/bin/cp");
            fs::copy(workdir.join("program.py"), workdir.join("run.py")).unwrap();
            Ok(FakeSandbox::succeeded(30))
        });
        spawn_worker(sandbox, Arc::clone(&store), &broker);

        broker
            .publish(
                &names.tasks,
                &JudgeTask::Compile {
                    submission_id: "sub-1".into(),
                    generation: 0,
                    language: Language::Python,
                    source: "print(1)".into(),
                    constraints: Constraints::default(),
                },
            )
            .unwrap();

        let results = broker
            .consumer::<JudgeResultMessage>(&names.results, 1)
            .unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("worker should publish a result");

        match &delivery.payload {
            JudgeResultMessage::Compile {
                submission_id,
                generation,
                result,
            } => {
                assert_eq!(submission_id, "sub-1");
                assert_eq!(*generation, 0);
                assert!(matches!(result, CompileResult::Succeeded));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        delivery.ack();

        let binary = store.get_latest(Bucket::Binaries, "sub-1").await.unwrap();
        assert_eq!(binary, b"print(1)");
    }

    #[tokio::test]
    async fn sandbox_fault_dead_letters_the_task() {
        let names = QueueNames::default();
        let broker = judging_broker(&names);
        let (_dir, store) = storage().await;

        let sandbox =
            FakeSandbox::new(|_workdir, _task| Err(SandboxError::Execution("box on fire".into())));
        spawn_worker(sandbox, store, &broker);

        broker
            .publish(
                &names.tasks,
                &JudgeTask::Compile {
                    submission_id: "sub-2".into(),
                    generation: 0,
                    language: Language::Cpp,
                    source: "int main() {}".into(),
                    constraints: Constraints::default(),
                },
            )
            .unwrap();

        let dead = broker.consumer::<JudgeTask>(&names.dead_tasks, 1).unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), dead.recv())
            .await
            .expect("failed task should be dead-lettered");
        assert_eq!(delivery.payload.submission_id(), Some("sub-2"));
        delivery.ack();

        assert_eq!(broker.queue_depth(&names.results).unwrap(), 0);
    }

    #[tokio::test]
    async fn grade_failure_still_reports_metrics_free_verdict() {
        let names = QueueNames::default();
        let broker = judging_broker(&names);
        let (_dir, store) = storage().await;

        store.put(Bucket::Binaries, "sub-3", b"bin").await.unwrap();
        let in_v = store.put(Bucket::Testcases, "p/1.in", b"1").await.unwrap();
        let out_v = store.put(Bucket::Testcases, "p/1.out", b"1").await.unwrap();
        let chk_v = store.put(Bucket::Checkers, "p", b"chk").await.unwrap();

        let sandbox = FakeSandbox::new(|_workdir, _task| Ok(SandboxOutcome::TimeLimitExceeded));
        spawn_worker(sandbox, Arc::clone(&store), &broker);

        broker
            .publish(
                &names.tasks,
                &JudgeTask::Grade {
                    submission_id: "sub-3".into(),
                    generation: 1,
                    problem_id: "p".into(),
                    testcase_index: 0,
                    language: Language::Cpp,
                    constraints: Constraints::default(),
                    testcase: common::TestcasePair {
                        input: common::ObjectRef {
                            object_name: "p/1.in".into(),
                            version_id: in_v,
                        },
                        output: common::ObjectRef {
                            object_name: "p/1.out".into(),
                            version_id: out_v,
                        },
                    },
                    checker: common::ObjectRef {
                        object_name: "p".into(),
                        version_id: chk_v,
                    },
                },
            )
            .unwrap();

        let results = broker
            .consumer::<JudgeResultMessage>(&names.results, 1)
            .unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("worker should publish a grade result");

        match &delivery.payload {
            JudgeResultMessage::Grade {
                testcase_index,
                result,
                ..
            } => {
                assert_eq!(*testcase_index, 0);
                assert_eq!(
                    result.status,
                    common::result::GradeStatus::TimeLimitExceeded
                );
                assert_eq!(result.time_ms, None);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        delivery.ack();
    }
}
