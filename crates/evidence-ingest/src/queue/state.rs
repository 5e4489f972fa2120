//! Queue bookkeeping. Every field is guarded by the queue's single mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::QueueError;

use super::cost::{CostGovernance, CostModel, DailyBudget};
use super::job::{JobKind, JobOutput, JobType, ProcessingJob};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    /// Finished without failing.
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    /// Cumulative cost since start; not reset daily.
    pub total_cost: f64,
    pub avg_processing_time_ms: f64,
    /// Age of the job at the head of the pending list.
    pub queue_wait_time_ms: i64,
}

/// A job taken off the pending list by the scheduler.
#[derive(Debug, Clone)]
pub struct StartedJob {
    pub id: String,
    pub kind: Arc<JobKind>,
    pub timeout: Duration,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Requeued,
    Failed,
}

#[derive(Debug)]
pub struct QueueState {
    jobs: HashMap<String, ProcessingJob>,
    /// Ids in start order: priority first, then submission.
    pending: VecDeque<String>,
    running: usize,
    running_ocr: usize,
    budget: DailyBudget,
    total_cost: f64,
}

impl QueueState {
    pub fn new(daily_cap: f64, today: NaiveDate) -> Self {
        Self {
            jobs: HashMap::new(),
            pending: VecDeque::new(),
            running: 0,
            running_ocr: 0,
            budget: DailyBudget::new(daily_cap, today),
            total_cost: 0.0,
        }
    }

    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        self.budget.roll_over(today)
    }

    /// Rejects the job when its estimate would push today's total over the
    /// cap; otherwise queues it.
    pub fn admit(&mut self, job: ProcessingJob) -> Result<(), QueueError> {
        if self.budget.would_exceed(job.estimated_cost) {
            return Err(QueueError::BudgetExceeded {
                current: self.budget.spent(),
                estimated: job.estimated_cost,
                cap: self.budget.cap(),
            });
        }
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);
        self.insert_pending(id);
        Ok(())
    }

    /// After every queued job of the same or higher priority, before any
    /// lower-priority one.
    fn insert_pending(&mut self, id: String) {
        let Some(rank) = self.jobs.get(&id).map(|j| j.priority.rank()) else {
            return;
        };
        let position = self
            .pending
            .iter()
            .position(|other| {
                self.jobs
                    .get(other)
                    .is_some_and(|j| j.priority.rank() > rank)
            })
            .unwrap_or(self.pending.len());
        self.pending.insert(position, id);
    }

    /// Takes the first pending job that fits the global cap, its class cap
    /// and the remaining budget, and marks it running.
    ///
    /// A high-priority job whose estimate no longer fits today's budget is
    /// skipped while cheaper jobs behind it run.
    pub fn start_next(
        &mut self,
        global_cap: usize,
        ocr_cap: usize,
        now: DateTime<Utc>,
    ) -> Option<StartedJob> {
        if self.running >= global_cap {
            return None;
        }

        let position = self.pending.iter().position(|id| {
            let Some(job) = self.jobs.get(id) else {
                return false;
            };
            if job.job_type() == JobType::Ocr && self.running_ocr >= ocr_cap {
                return false;
            }
            !self.budget.would_exceed(job.estimated_cost)
        })?;

        let id = self.pending.remove(position)?;
        let job = self.jobs.get_mut(&id)?;
        job.started_at = Some(now);
        self.running += 1;
        if job.job_type() == JobType::Ocr {
            self.running_ocr += 1;
        }

        Some(StartedJob {
            id,
            kind: Arc::clone(&job.kind),
            timeout: job.timeout,
            attempt: job.retries + 1,
        })
    }

    /// Records the outcome of a run. Successful runs are charged once;
    /// failures are requeued at their priority while retries remain. A job's
    /// error is only set once it has failed for good.
    pub fn settle(
        &mut self,
        id: &str,
        result: Result<JobOutput, QueueError>,
        costs: &CostModel,
        now: DateTime<Utc>,
    ) -> Option<Settlement> {
        let job = self.jobs.get_mut(id)?;
        if job.started_at.is_none() || job.completed_at.is_some() {
            return None;
        }

        self.running = self.running.saturating_sub(1);
        if job.job_type() == JobType::Ocr {
            self.running_ocr = self.running_ocr.saturating_sub(1);
        }

        match result {
            Ok(output) => {
                if job.actual_cost.is_none() {
                    let cost = costs.actual(&job.kind, &output);
                    job.actual_cost = Some(cost);
                    self.budget.charge(cost);
                    self.total_cost += cost;
                }
                job.output = Some(output);
                job.error = None;
                job.completed_at = Some(now);
                Some(Settlement::Completed)
            }
            Err(e) => {
                if job.retries < job.max_retries {
                    job.retries += 1;
                    job.started_at = None;
                    let id = job.id.clone();
                    self.insert_pending(id);
                    Some(Settlement::Requeued)
                } else {
                    job.error = Some(e.to_string());
                    job.failed = true;
                    job.completed_at = Some(now);
                    Some(Settlement::Failed)
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProcessingJob> {
        self.jobs.get(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn running_ocr(&self) -> usize {
        self.running_ocr
    }

    pub fn governance(&self) -> CostGovernance {
        self.budget.governance()
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> QueueMetrics {
        let mut completed = 0;
        let mut failed = 0;
        let mut processing_ms = 0i64;

        for job in self.jobs.values() {
            let Some(completed_at) = job.completed_at else {
                continue;
            };
            if job.failed {
                failed += 1;
            } else {
                completed += 1;
                if let Some(started) = job.started_at {
                    processing_ms += (completed_at - started).num_milliseconds().max(0);
                }
            }
        }

        let queue_wait_time_ms = self
            .pending
            .front()
            .and_then(|id| self.jobs.get(id))
            .map(|job| (now - job.created_at).num_milliseconds().max(0))
            .unwrap_or(0);

        QueueMetrics {
            total_jobs: self.jobs.len(),
            pending_jobs: self.pending.len(),
            running_jobs: self.running,
            completed_jobs: completed,
            failed_jobs: failed,
            total_cost: self.total_cost,
            avg_processing_time_ms: if completed > 0 {
                processing_ms as f64 / completed as f64
            } else {
                0.0
            },
            queue_wait_time_ms,
        }
    }
}
