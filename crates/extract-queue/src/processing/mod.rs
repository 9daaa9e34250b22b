//! Serial task queue with cooperative pause/cancel and page-level progress

mod batch;
mod processor;
mod task;
mod task_queue;
mod worker;

pub use batch::BatchSnapshot;
pub use processor::{PageContext, Processor, ProcessorJob};
pub use task::{
    is_valid_transition, PageTiming, StopReason, StopSignal, SubmitRequest, Task, TaskProgress,
};
pub use task_queue::{CurrentTask, QueueSnapshot, RetryOptions, TaskQueue, TaskSnapshot};
pub use worker::{resolve_outcome, RunResult};
