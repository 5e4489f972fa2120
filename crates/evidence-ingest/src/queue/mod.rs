//! Cost-governed, priority-ordered queue for deferred work.
//!
//! Admission is checked against the daily cost cap at submit time. A
//! scheduler task starts jobs while the global and OCR concurrency caps
//! allow, waking on submissions and finished jobs, with a fixed tick as a
//! fallback that also rolls the daily total over at local midnight.

pub mod cost;
pub mod executor;
pub mod job;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, Utc};
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::config::QueueConfig;
use crate::error::QueueError;

pub use cost::{CostGovernance, CostModel, DailyBudget};
pub use executor::{JobExecutor, PipelineJobExecutor};
pub use job::{
    CompressJob, JobKind, JobOutput, JobPriority, JobRequest, JobState, JobStatusView, JobType,
    OcrJob, ProcessingJob, StorageJob, TransformJob,
};
pub use state::{QueueMetrics, QueueState, Settlement};

/// Handle to the queue. Clones share the same queue.
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: QueueConfig,
    costs: CostModel,
    state: Mutex<QueueState>,
    executor: Arc<dyn JobExecutor>,
    wake: Notify,
    shutdown: AtomicBool,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessingQueue {
    /// Creates the queue and spawns its scheduler. Must be called from
    /// within a tokio runtime.
    pub fn start(config: QueueConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let inner = Arc::new(QueueInner {
            costs: CostModel::new(config.costs.clone()),
            state: Mutex::new(QueueState::new(
                config.daily_cost_cap,
                Local::now().date_naive(),
            )),
            executor,
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            scheduler: Mutex::new(None),
            config,
        });

        let handle = tokio::spawn(run_scheduler(Arc::clone(&inner)));
        *inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            "Processing queue started (global cap {}, OCR cap {}, daily cap {:.2})",
            inner.config.global_concurrency,
            inner.config.ocr_concurrency,
            inner.config.daily_cost_cap
        );

        Self { inner }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.inner.costs
    }

    /// Queues a job and returns its id, or rejects it when its estimated
    /// cost would exceed today's remaining budget.
    pub fn submit(&self, request: JobRequest) -> Result<String, QueueError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(QueueError::ShutDown);
        }

        let estimated_cost = request
            .estimated_cost
            .unwrap_or_else(|| self.inner.costs.estimate(&request.kind));
        if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            warn!("Rejected job with estimated cost {}", estimated_cost);
            return Err(QueueError::InvalidEstimate {
                estimated: estimated_cost,
            });
        }
        let job = ProcessingJob {
            id: uuid::Uuid::new_v4().to_string(),
            kind: Arc::new(request.kind),
            priority: request.priority,
            retries: 0,
            max_retries: request
                .max_retries
                .unwrap_or(self.inner.config.default_max_retries),
            timeout: request
                .timeout
                .unwrap_or(Duration::from_secs(self.inner.config.default_timeout_secs)),
            estimated_cost,
            actual_cost: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            failed: false,
            output: None,
        };
        let id = job.id.clone();
        let job_type = job.job_type();
        let priority = job.priority;

        {
            let mut state = self.inner.lock_state();
            state.roll_over(Local::now().date_naive());
            if let Err(e) = state.admit(job) {
                warn!("Rejected {} job: {}", job_type, e);
                return Err(e);
            }
        }

        debug!(
            "Queued {} job {} ({:?}, estimated cost {:.2})",
            job_type, id, priority, estimated_cost
        );
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Snapshot of a job, including its output once finished.
    pub fn status(&self, id: &str) -> Option<ProcessingJob> {
        self.inner.lock_state().get(id).cloned()
    }

    pub fn job_view(&self, id: &str) -> Option<JobStatusView> {
        self.inner
            .lock_state()
            .get(id)
            .map(|job| job.view(Utc::now()))
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.inner.lock_state().metrics(Utc::now())
    }

    pub fn governance(&self) -> CostGovernance {
        self.inner.lock_state().governance()
    }

    /// Polls until the job is terminal. Returns `None` for unknown ids.
    pub async fn wait_for(&self, id: &str, poll: Duration) -> Option<ProcessingJob> {
        loop {
            let job = self.status(id)?;
            if job.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stops the scheduler. Jobs already running finish; pending jobs stay
    /// pending and further submissions are rejected.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.wake.notify_one();

        let handle = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Queue scheduler task failed: {}", e);
            }
        }
        info!("Processing queue stopped");
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // Bookkeeping is updated in single steps, so a poisoned lock still
        // holds consistent data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts as many eligible jobs as the caps allow.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let started = {
                let mut state = self.lock_state();
                if state.roll_over(Local::now().date_naive()) {
                    info!("Daily cost budget reset");
                }
                state.start_next(
                    self.config.global_concurrency,
                    self.config.ocr_concurrency,
                    Utc::now(),
                )
            };
            let Some(started) = started else { break };

            let inner = Arc::clone(self);
            let span = info_span!(
                "queue.job",
                job_id = %started.id,
                kind = %started.kind.job_type(),
                attempt = started.attempt
            );
            tokio::spawn(async move { inner.run_job(started).await }.instrument(span));
        }
    }

    async fn run_job(self: Arc<Self>, started: state::StartedJob) {
        let result = match tokio::time::timeout(
            started.timeout,
            self.executor.execute(&started.kind),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout {
                after: started.timeout,
            }),
        };

        if let Err(e) = &result {
            warn!("Job {} attempt {} failed: {}", started.id, started.attempt, e);
        }

        let settlement = self
            .lock_state()
            .settle(&started.id, result, &self.costs, Utc::now());
        match settlement {
            Some(Settlement::Completed) => debug!("Job {} completed", started.id),
            Some(Settlement::Requeued) => debug!("Job {} requeued", started.id),
            Some(Settlement::Failed) => warn!("Job {} failed permanently", started.id),
            None => {}
        }
        self.wake.notify_one();
    }
}

async fn run_scheduler(inner: Arc<QueueInner>) {
    let tick = Duration::from_millis(inner.config.tick_interval_ms.max(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.dispatch();

        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.wake.notified() => {}
        }
    }
    debug!("Queue scheduler exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn config() -> QueueConfig {
        QueueConfig {
            global_concurrency: 3,
            ocr_concurrency: 2,
            daily_cost_cap: 100.0,
            tick_interval_ms: 20,
            default_max_retries: 3,
            default_timeout_secs: 5,
            ..Default::default()
        }
    }

    fn compress(tag: &str) -> JobKind {
        JobKind::Compress(CompressJob {
            bytes: tag.as_bytes().to_vec(),
            filename: tag.to_string(),
            mime_type: "text/plain".to_string(),
        })
    }

    fn ocr() -> JobKind {
        JobKind::Ocr(OcrJob::default())
    }

    fn done() -> JobOutput {
        JobOutput::Ocr(Vec::new())
    }

    /// Records the filename of each compress job it runs.
    #[derive(Default)]
    struct RecordingExecutor {
        order: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn execute(&self, job: &JobKind) -> Result<JobOutput, QueueError> {
            if let JobKind::Compress(c) = job {
                self.order.lock().unwrap().push(c.filename.clone());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(done())
        }
    }

    /// Tracks peak concurrency overall and for OCR jobs.
    #[derive(Default)]
    struct GaugeExecutor {
        active: AtomicUsize,
        active_ocr: AtomicUsize,
        peak: AtomicUsize,
        peak_ocr: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for GaugeExecutor {
        async fn execute(&self, job: &JobKind) -> Result<JobOutput, QueueError> {
            let is_ocr = matches!(job, JobKind::Ocr(_));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if is_ocr {
                let now = self.active_ocr.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_ocr.fetch_max(now, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
            if is_ocr {
                self.active_ocr.fetch_sub(1, Ordering::SeqCst);
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(done())
        }
    }

    struct FailingExecutor {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        async fn execute(&self, _: &JobKind) -> Result<JobOutput, QueueError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::JobFailed("extractor crashed".to_string()))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl JobExecutor for SlowExecutor {
        async fn execute(&self, _: &JobKind) -> Result<JobOutput, QueueError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(done())
        }
    }

    async fn wait_idle(queue: &ProcessingQueue, expected: usize) -> QueueMetrics {
        for _ in 0..500 {
            let metrics = queue.metrics();
            if metrics.completed_jobs + metrics.failed_jobs == expected {
                return metrics;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not drain: {:?}", queue.metrics());
    }

    #[tokio::test]
    async fn test_budget_rejection_leaves_queue_unchanged() {
        let mut cfg = config();
        cfg.daily_cost_cap = 1.0;
        let queue = ProcessingQueue::start(cfg, Arc::new(RecordingExecutor::default()));

        let err = queue
            .submit(JobRequest::new(compress("big")).with_estimated_cost(1.5))
            .unwrap_err();
        assert!(matches!(err, QueueError::BudgetExceeded { cap, .. } if cap == 1.0));
        assert_eq!(queue.metrics().total_jobs, 0);
        assert_eq!(queue.metrics().pending_jobs, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_estimate_is_rejected() {
        let queue = ProcessingQueue::start(config(), Arc::new(RecordingExecutor::default()));

        for estimate in [f64::NAN, -1.0, f64::INFINITY, f64::NEG_INFINITY] {
            let err = queue
                .submit(JobRequest::new(compress("odd")).with_estimated_cost(estimate))
                .unwrap_err();
            assert!(
                matches!(err, QueueError::InvalidEstimate { .. }),
                "estimate {} gave {:?}",
                estimate,
                err
            );
        }
        assert_eq!(queue.metrics().total_jobs, 0);
        assert_eq!(queue.governance().current_daily_cost, 0.0);

        // Zero is a valid estimate.
        queue
            .submit(JobRequest::new(compress("free")).with_estimated_cost(0.0))
            .unwrap();
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_order_regardless_of_submission() {
        let mut cfg = config();
        cfg.global_concurrency = 1;
        let executor = Arc::new(RecordingExecutor::default());
        let queue = ProcessingQueue::start(cfg, executor.clone());

        queue
            .submit(JobRequest::new(compress("low")).with_priority(JobPriority::Low))
            .unwrap();
        queue
            .submit(JobRequest::new(compress("high")).with_priority(JobPriority::High))
            .unwrap();
        queue
            .submit(JobRequest::new(compress("medium")).with_priority(JobPriority::Medium))
            .unwrap();

        wait_idle(&queue, 3).await;
        assert_eq!(*executor.order.lock().unwrap(), vec!["high", "medium", "low"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_caps_hold() {
        let executor = Arc::new(GaugeExecutor::default());
        let queue = ProcessingQueue::start(config(), executor.clone());

        for i in 0..6 {
            queue.submit(JobRequest::new(ocr())).unwrap();
            queue.submit(JobRequest::new(compress(&i.to_string()))).unwrap();
        }

        let metrics = wait_idle(&queue, 12).await;
        assert_eq!(metrics.completed_jobs, 12);
        assert!(executor.peak.load(Ordering::SeqCst) <= 3);
        assert!(executor.peak_ocr.load(Ordering::SeqCst) <= 2);
        assert!(executor.peak.load(Ordering::SeqCst) >= 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_job_retries_then_fails() {
        let executor = Arc::new(FailingExecutor {
            attempts: AtomicUsize::new(0),
        });
        let queue = ProcessingQueue::start(config(), executor.clone());

        let id = queue
            .submit(JobRequest::new(compress("bad")).with_max_retries(2))
            .unwrap();
        let job = queue.wait_for(&id, Duration::from_millis(5)).await.unwrap();

        assert!(job.failed);
        assert_eq!(job.retries, 2);
        assert_eq!(executor.attempts.load(Ordering::SeqCst), 3);
        assert!(!job.error.unwrap_or_default().is_empty());
        assert!(job.actual_cost.is_none());

        let view = queue.job_view(&id).unwrap();
        assert_eq!(view.status, JobState::Completed);
        assert_eq!(view.progress, 100);
        assert!(view.error.unwrap().contains("extractor crashed"));
        assert_eq!(queue.metrics().failed_jobs, 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let queue = ProcessingQueue::start(config(), Arc::new(SlowExecutor));
        let id = queue
            .submit(
                JobRequest::new(compress("slow"))
                    .with_timeout(Duration::from_millis(20))
                    .with_max_retries(0),
            )
            .unwrap();

        let job = queue.wait_for(&id, Duration::from_millis(5)).await.unwrap();
        assert!(job.failed);
        assert_eq!(job.retries, 0);
        assert!(job.error.unwrap().contains("timed out"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_completed_job_charges_actual_cost() {
        let queue = ProcessingQueue::start(config(), Arc::new(RecordingExecutor::default()));
        let id = queue.submit(JobRequest::new(compress("a"))).unwrap();
        let job = queue.wait_for(&id, Duration::from_millis(5)).await.unwrap();

        let flat = config().costs.compress_flat;
        assert_eq!(job.actual_cost, Some(flat));
        let governance = queue.governance();
        assert!((governance.current_daily_cost - flat).abs() < 1e-9);
        assert!((governance.remaining - (100.0 - flat)).abs() < 1e-9);
        assert!((queue.metrics().total_cost - flat).abs() < 1e-9);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let queue = ProcessingQueue::start(config(), Arc::new(RecordingExecutor::default()));
        queue.shutdown().await;
        assert_eq!(
            queue.submit(JobRequest::new(compress("late"))).unwrap_err(),
            QueueError::ShutDown
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let queue = ProcessingQueue::start(config(), Arc::new(RecordingExecutor::default()));
        assert!(queue.status("missing").is_none());
        assert!(queue.job_view("missing").is_none());
        assert!(queue.wait_for("missing", Duration::from_millis(1)).await.is_none());
        queue.shutdown().await;
    }
}
