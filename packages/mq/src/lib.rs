pub mod broker;
pub mod error;

pub use broker::{Broker, Consumer, Delivery, QueueOptions};
pub use error::MqError;

use common::config::QueueNames;

/// Declare the judging pipeline's queues with their dead-letter routing.
pub fn declare_judging_queues(broker: &Broker, names: &QueueNames) {
    broker.declare_queue(QueueOptions {
        name: names.tasks.clone(),
        dead_letter: Some(names.dead_tasks.clone()),
    });
    broker.declare_queue(QueueOptions {
        name: names.results.clone(),
        dead_letter: Some(names.dead_results.clone()),
    });
    broker.declare_queue(QueueOptions {
        name: names.dead_tasks.clone(),
        dead_letter: None,
    });
    broker.declare_queue(QueueOptions {
        name: names.dead_results.clone(),
        dead_letter: None,
    });
}
