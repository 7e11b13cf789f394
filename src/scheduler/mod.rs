//! Task scheduler
//!
//! A [`Task`] turns a value into one of three outcomes. A [`Scheduler`] runs
//! an ordered list of tasks, threading the value from one task to the next,
//! and decides per task whether a failure aborts the run. [`Looped`] turns a
//! single poll into a task that keeps polling until it passes or fails.

mod looped;

pub use looped::{Looped, LoopedStep};

use crate::error::WatchtowerResult;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Passed(T),
    Failed(T),
    /// Not decided yet; poll again after the delay
    Wait(T, Duration),
}

impl<T> TaskOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            TaskOutcome::Passed(v) | TaskOutcome::Failed(v) | TaskOutcome::Wait(v, _) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            TaskOutcome::Passed(v) | TaskOutcome::Failed(v) | TaskOutcome::Wait(v, _) => v,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, TaskOutcome::Wait(..))
    }
}

#[async_trait]
pub trait Task<T>: Send + Sync {
    fn name(&self) -> String;

    async fn run(&self, value: T, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<T>>;
}

/// What a failed task does to the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Return,
    Pass,
}

/// How a scheduler run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult<T> {
    Completed(T),
    Aborted { task: String, value: T },
}

impl<T> RunResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunResult::Completed(_))
    }
}

struct Step<T> {
    task: Arc<dyn Task<T>>,
    action: FailureAction,
    on_failure: Option<Scheduler<T>>,
}

pub struct Scheduler<T> {
    steps: Vec<Step<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T: Clone + Send + Sync + 'static> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(
        mut self,
        task: impl Task<T> + 'static,
        action: FailureAction,
        on_failure: Option<Scheduler<T>>,
    ) -> Self {
        self.steps.push(Step {
            task: Arc::new(task),
            action,
            on_failure,
        });
        self
    }

    /// Append a task that aborts the run on failure
    pub fn then(self, task: impl Task<T> + 'static) -> Self {
        self.add_task(task, FailureAction::Return, None)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every task in order. A failed task first hands its value to its
    /// failure pipeline, then either ends the run or lets the next task
    /// continue with that value.
    pub fn run<'a>(
        &'a self,
        value: T,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, WatchtowerResult<RunResult<T>>> {
        async move {
            let mut value = value;

            for step in &self.steps {
                let outcome = step.task.run(value, cancel).await?;

                let failed = match outcome {
                    TaskOutcome::Failed(failed) => failed,
                    other => {
                        value = other.into_value();
                        continue;
                    }
                };

                let name = step.task.name();
                debug!("Task {} failed", name);

                if let Some(on_failure) = &step.on_failure {
                    on_failure.run(failed.clone(), cancel).await?;
                }

                if step.action == FailureAction::Return {
                    return Ok(RunResult::Aborted { task: name, value: failed });
                }

                value = failed;
            }

            Ok(RunResult::Completed(value))
        }
        .boxed()
    }
}
