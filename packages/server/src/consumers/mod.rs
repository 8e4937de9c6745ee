mod dead_letter;
mod judge_result;

pub use dead_letter::{run_dead_result_consumer, run_dead_task_consumer};
pub use judge_result::run_judge_result_consumer;

pub(crate) use judge_result::complete_grading;
