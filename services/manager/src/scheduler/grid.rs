//! Backlog and assignment bookkeeping.
//!
//! [`GridScheduler`] is plain state with no I/O. The service wraps it in a
//! lock and turns the reports it returns into protocol messages and ledger
//! writes.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use ankadepth_proto::{RunnerState, Task, TaskId, WorkerId};
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::SchedulerError;
use crate::ledger::Outcome;

/// A worker on the grid.
#[derive(Debug, Clone)]
struct WorkerRecord {
    id: WorkerId,
    capacity: usize,
    assigned: Vec<Task>,
}

/// What one scheduling pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Assignments that timed out and went back to the backlog tail.
    pub requeued: Vec<(WorkerId, TaskId)>,
    /// New assignments, in the order they were made.
    pub assigned: Vec<(WorkerId, Task)>,
    /// The backlog is empty and nothing is in flight.
    pub finished: bool,
}

/// Counters shown on the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridStatus {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub workers: usize,
    pub backlog: usize,
    pub in_flight: usize,
}

impl GridStatus {
    /// Share of the total that has an outcome, in percent.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed + self.failed) as f64 / self.total as f64 * 100.0
    }
}

/// Global backlog and per-worker assignments.
#[derive(Debug)]
pub struct GridScheduler {
    backlog: VecDeque<Task>,
    workers: Vec<WorkerRecord>,
    total: u64,
    completed: u64,
    failed: u64,
    timeout: TimeDelta,
}

impl GridScheduler {
    /// Build a scheduler over `tasks`, ordered by id.
    pub fn new(mut tasks: Vec<Task>, timeout: Duration) -> Self {
        tasks.sort_by_key(|task| task.id);
        Self {
            total: tasks.len() as u64,
            backlog: tasks.into(),
            workers: Vec::new(),
            completed: 0,
            failed: 0,
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Remove backlog tasks whose id is in `ids`. Returns how many went.
    pub fn drop_processed(&mut self, ids: &HashSet<TaskId>) -> usize {
        let before = self.backlog.len();
        self.backlog.retain(|task| !ids.contains(&task.id));
        before - self.backlog.len()
    }

    /// Seed the outcome counters from earlier runs.
    pub fn restore_counters(&mut self, completed: u64, failed: u64) {
        self.completed = completed;
        self.failed = failed;
    }

    /// Add a worker at the end of the worker order.
    pub fn register_worker(&mut self, id: WorkerId, capacity: usize) -> Result<(), SchedulerError> {
        if capacity == 0 {
            return Err(SchedulerError::ZeroCapacity(id));
        }
        if self.position(&id).is_some() {
            return Err(SchedulerError::DuplicateWorker(id));
        }
        self.workers.push(WorkerRecord {
            id,
            capacity,
            assigned: Vec::new(),
        });
        Ok(())
    }

    /// Drop a worker and put its assignments back at the backlog front, in
    /// their assignment order. Returns the requeued ids.
    pub fn unregister_worker(&mut self, id: &WorkerId) -> Result<Vec<TaskId>, SchedulerError> {
        let at = self
            .position(id)
            .ok_or_else(|| SchedulerError::UnknownWorker(id.clone()))?;
        let record = self.workers.remove(at);

        let requeued = record.assigned.iter().map(|task| task.id).collect();
        for mut task in record.assigned.into_iter().rev() {
            task.assigned_at = None;
            self.backlog.push_front(task);
        }
        Ok(requeued)
    }

    /// Record the outcome a worker reported for one of its tasks.
    ///
    /// Only [`RunnerState::Completed`] counts as completed.
    pub fn report_result(
        &mut self,
        worker: &WorkerId,
        task_id: TaskId,
        state: RunnerState,
    ) -> Result<Outcome, SchedulerError> {
        let at = self
            .position(worker)
            .ok_or_else(|| SchedulerError::UnknownWorker(worker.clone()))?;
        let record = &mut self.workers[at];
        let index = record
            .assigned
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| SchedulerError::UnknownTask {
                worker: worker.clone(),
                task_id,
            })?;
        record.assigned.remove(index);

        if state == RunnerState::Completed {
            self.completed += 1;
            Ok(Outcome::Completed)
        } else {
            self.failed += 1;
            Ok(Outcome::Failed)
        }
    }

    /// One scheduling pass at `now`.
    ///
    /// Workers are visited in join order. Each first loses assignments older
    /// than the timeout, then is filled up to capacity. With more backlog
    /// than workers, worker `i` takes from index `len / workers * i`;
    /// otherwise from the head.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let worker_count = self.workers.len();
        let timeout = self.timeout;

        for (i, record) in self.workers.iter_mut().enumerate() {
            let (expired, kept): (Vec<Task>, Vec<Task>) =
                record.assigned.drain(..).partition(|task| {
                    task.assigned_at
                        .is_some_and(|at| now.signed_duration_since(at) >= timeout)
                });
            record.assigned = kept;
            for mut task in expired {
                report.requeued.push((record.id.clone(), task.id));
                task.assigned_at = None;
                self.backlog.push_back(task);
            }

            while record.assigned.len() < record.capacity && !self.backlog.is_empty() {
                let len = self.backlog.len();
                let index = if len > worker_count {
                    len / worker_count * i
                } else {
                    0
                };
                let Some(mut task) = self.backlog.remove(index) else {
                    break;
                };
                task.assigned_at = Some(now);
                report.assigned.push((record.id.clone(), task.clone()));
                record.assigned.push(task);
            }
        }

        report.finished = self.is_finished();
        report
    }

    /// True when no task is waiting or in flight.
    pub fn is_finished(&self) -> bool {
        self.backlog.is_empty() && self.workers.iter().all(|w| w.assigned.is_empty())
    }

    /// Every assignment as (worker, task id), in worker order.
    pub fn assignments(&self) -> Vec<(WorkerId, TaskId)> {
        self.workers
            .iter()
            .flat_map(|w| w.assigned.iter().map(|task| (w.id.clone(), task.id)))
            .collect()
    }

    /// Registered workers in join order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }

    pub fn has_workers(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Ids waiting in the backlog, front first.
    pub fn backlog_ids(&self) -> Vec<TaskId> {
        self.backlog.iter().map(|task| task.id).collect()
    }

    pub fn status(&self) -> GridStatus {
        GridStatus {
            completed: self.completed,
            failed: self.failed,
            total: self.total,
            workers: self.workers.len(),
            backlog: self.backlog.len(),
            in_flight: self.workers.iter().map(|w| w.assigned.len()).sum(),
        }
    }

    fn position(&self, id: &WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| &w.id == id)
    }
}
