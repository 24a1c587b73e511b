//! Calibration executor
//!
//! Sequences calibration steps against a [`CommandChannel`]: single steps, selected
//! batches and the one-click run over all five steps. Batch runs can be paused at
//! step boundaries; a single step has no boundary to hold at, so pause is refused
//! there. Any run can be cancelled at a step boundary or during a delay. Only one
//! run is active at a time.

mod model;
mod progress;

pub use model::{
    ExecutionConfig, ExecutionResult, ExecutionStatistics, ExecutionStatus,
    StepStatistics,
};
pub use progress::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::communicator::CommandChannel;
use crate::error::{CalSrvError, Result};
use crate::steps::{
    create_all_steps, CalibrationParameters, StepResult, StepRunner, StepStatus, StepSummary,
};
use model::RunPolicy;
use progress::notify;

/// Control signal observed by the running batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunSignal {
    Run,
    Pause,
    Cancel,
}

/// Wait out a pause. Returns false once cancelled.
async fn wait_while_paused(signal: &mut watch::Receiver<RunSignal>) -> bool {
    loop {
        let current = *signal.borrow_and_update();
        match current {
            RunSignal::Run => return true,
            RunSignal::Cancel => return false,
            RunSignal::Pause => {},
        }
        if signal.changed().await.is_err() {
            return false;
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
async fn interruptible_delay(signal: &mut watch::Receiver<RunSignal>, delay: Duration) -> bool {
    if *signal.borrow() == RunSignal::Cancel {
        return false;
    }
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = async { signal.wait_for(|s| *s == RunSignal::Cancel).await.is_ok() } => false,
    }
}

/// Runs calibration steps and keeps their history
pub struct CalibrationExecutor {
    channel: Arc<dyn CommandChannel>,
    config: ExecutionConfig,
    steps: tokio::sync::Mutex<Vec<StepRunner>>,
    step_ids: Vec<&'static str>,
    active: AtomicBool,
    /// Set while the active run has step boundaries to pause at
    pausable: AtomicBool,
    status: RwLock<ExecutionStatus>,
    current: RwLock<Option<ExecutionResult>>,
    history: Mutex<Vec<ExecutionResult>>,
    counter: AtomicU64,
    signal: watch::Sender<RunSignal>,
}

impl std::fmt::Debug for CalibrationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationExecutor")
            .field("config", &self.config)
            .field("steps", &self.step_ids)
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

/// Releases the active flag when a run or single step ends
struct ActiveGuard<'a> {
    executor: &'a CalibrationExecutor,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.executor.status.write() = ExecutionStatus::Idle;
        self.executor.pausable.store(false, Ordering::Release);
        self.executor.active.store(false, Ordering::Release);
    }
}

impl CalibrationExecutor {
    pub fn new(channel: Arc<dyn CommandChannel>, config: ExecutionConfig) -> Self {
        let runners: Vec<StepRunner> = create_all_steps().into_iter().map(StepRunner::new).collect();
        let step_ids = runners.iter().map(|r| r.step_id()).collect();
        let (signal, _) = watch::channel(RunSignal::Run);

        Self {
            channel,
            config,
            steps: tokio::sync::Mutex::new(runners),
            step_ids,
            active: AtomicBool::new(false),
            pausable: AtomicBool::new(false),
            status: RwLock::new(ExecutionStatus::Idle),
            current: RwLock::new(None),
            history: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            signal,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.read()
    }

    /// Step ids in run order
    pub fn step_ids(&self) -> &[&'static str] {
        &self.step_ids
    }

    /// Snapshot of the current or most recent run
    pub fn current_execution(&self) -> Option<ExecutionResult> {
        self.current.read().clone()
    }

    pub fn execution_history(&self) -> Vec<ExecutionResult> {
        self.history.lock().clone()
    }

    pub fn execution_statistics(&self) -> ExecutionStatistics {
        ExecutionStatistics::from_history(&self.history.lock())
    }

    /// Step summaries. Waits for a step that is currently executing.
    pub async fn steps_info(&self) -> Vec<StepSummary> {
        self.steps.lock().await.iter().map(StepRunner::summary).collect()
    }

    pub async fn step_info(&self, step_id: &str) -> Option<StepSummary> {
        self.steps
            .lock()
            .await
            .iter()
            .find(|r| r.step_id() == step_id)
            .map(StepRunner::summary)
    }

    /// Reset every step to pending. Rejected while a run is active.
    pub async fn reset_all_steps(&self) -> Result<()> {
        let _guard = self.begin(ExecutionStatus::Idle, false)?;
        for runner in self.steps.lock().await.iter_mut() {
            runner.reset();
        }
        info!("All calibration steps reset");
        Ok(())
    }

    fn check_step_ids<S: AsRef<str>>(&self, step_ids: &[S]) -> Result<()> {
        for id in step_ids {
            let id = id.as_ref();
            if !self.step_ids.iter().any(|known| *known == id) {
                return Err(CalSrvError::UnknownStep(id.to_string()));
            }
        }
        Ok(())
    }

    /// Mark the executor active. Fails with `Busy` while another run holds it.
    fn activate(&self, status: ExecutionStatus, pausable: bool) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CalSrvError::busy(format!(
                "executor is {}",
                self.status.read()
            )));
        }
        self.pausable.store(pausable, Ordering::Release);
        self.signal.send_replace(RunSignal::Run);
        *self.status.write() = status;
        Ok(())
    }

    fn begin(&self, status: ExecutionStatus, pausable: bool) -> Result<ActiveGuard<'_>> {
        self.activate(status, pausable)?;
        Ok(ActiveGuard { executor: self })
    }

    fn next_execution_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Execute one step, retrying failures per configuration
    pub async fn execute_single_step(
        &self,
        step_id: &str,
        params: &CalibrationParameters,
        observer: &dyn ProgressObserver,
    ) -> Result<StepResult> {
        self.check_step_ids(&[step_id])?;
        let _guard = self.begin(ExecutionStatus::Running, false)?;
        let mut signal = self.signal.subscribe();

        notify(observer, step_id, StepStatus::Running, None);
        let result = self
            .run_step(step_id, params, &self.config.batch_policy(), &mut signal)
            .await;
        notify(observer, step_id, result.status, Some(&result));
        Ok(result)
    }

    /// Execute the given steps in order
    pub async fn execute_selected_steps<S: AsRef<str>>(
        &self,
        step_ids: &[S],
        params: &CalibrationParameters,
        observer: &dyn ProgressObserver,
    ) -> Result<ExecutionResult> {
        self.check_step_ids(step_ids)?;
        let guard = self.begin(ExecutionStatus::Running, true)?;
        let ids: Vec<String> = step_ids.iter().map(|s| s.as_ref().to_string()).collect();
        let result = self
            .run_batch("batch", &ids, params, self.config.batch_policy(), observer)
            .await;
        drop(guard);
        Ok(result)
    }

    /// Execute all five steps with the one-click policy
    pub async fn execute_one_click_calibration(
        &self,
        params: &CalibrationParameters,
        observer: &dyn ProgressObserver,
    ) -> Result<ExecutionResult> {
        let guard = self.begin(ExecutionStatus::Running, true)?;
        let ids = self.all_step_ids();
        info!("Starting one-click calibration");
        let result = self
            .run_batch("one_click", &ids, params, self.config.one_click_policy(), observer)
            .await;
        drop(guard);
        Ok(result)
    }

    /// Background form of [`execute_selected_steps`](Self::execute_selected_steps).
    ///
    /// The executor is Running when this returns, so a second submission fails
    /// with `Busy` right away.
    pub fn spawn_selected_steps(
        self: &Arc<Self>,
        step_ids: Vec<String>,
        params: CalibrationParameters,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<JoinHandle<ExecutionResult>> {
        self.check_step_ids(&step_ids)?;
        self.activate(ExecutionStatus::Running, true)?;
        let executor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = ActiveGuard {
                executor: &executor,
            };
            executor
                .run_batch(
                    "batch",
                    &step_ids,
                    &params,
                    executor.config.batch_policy(),
                    observer.as_ref(),
                )
                .await
        }))
    }

    pub fn spawn_one_click_calibration(
        self: &Arc<Self>,
        params: CalibrationParameters,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<JoinHandle<ExecutionResult>> {
        self.activate(ExecutionStatus::Running, true)?;
        let executor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = ActiveGuard {
                executor: &executor,
            };
            let ids = executor.all_step_ids();
            executor
                .run_batch(
                    "one_click",
                    &ids,
                    &params,
                    executor.config.one_click_policy(),
                    observer.as_ref(),
                )
                .await
        }))
    }

    /// Hold the active batch at the next step boundary. Refused for a single step.
    pub fn pause_execution(&self) -> bool {
        let mut status = self.status.write();
        if *status != ExecutionStatus::Running || !self.pausable.load(Ordering::Acquire) {
            return false;
        }
        *status = ExecutionStatus::Paused;
        self.signal.send_replace(RunSignal::Pause);
        info!("Execution paused");
        true
    }

    pub fn resume_execution(&self) -> bool {
        let mut status = self.status.write();
        if *status != ExecutionStatus::Paused {
            return false;
        }
        *status = ExecutionStatus::Running;
        self.signal.send_replace(RunSignal::Run);
        info!("Execution resumed");
        true
    }

    /// Stop the active run at the next step boundary or delay
    pub fn cancel_execution(&self) -> bool {
        let mut status = self.status.write();
        if !matches!(*status, ExecutionStatus::Running | ExecutionStatus::Paused) {
            return false;
        }
        *status = ExecutionStatus::Cancelled;
        self.signal.send_replace(RunSignal::Cancel);
        info!("Execution cancelled");
        true
    }

    fn all_step_ids(&self) -> Vec<String> {
        self.step_ids.iter().map(|id| id.to_string()).collect()
    }

    async fn run_batch(
        &self,
        prefix: &str,
        step_ids: &[String],
        params: &CalibrationParameters,
        policy: RunPolicy,
        observer: &dyn ProgressObserver,
    ) -> ExecutionResult {
        let mut signal = self.signal.subscribe();
        let mut execution = ExecutionResult::new(self.next_execution_id(prefix));
        let started = Instant::now();
        info!(
            execution = %execution.execution_id,
            steps = ?step_ids,
            "Starting calibration run"
        );
        *self.current.write() = Some(execution.clone());

        for (index, step_id) in step_ids.iter().enumerate() {
            if !wait_while_paused(&mut signal).await {
                break;
            }

            notify(observer, step_id, StepStatus::Running, None);
            let result = self.run_step(step_id, params, &policy, &mut signal).await;
            notify(observer, step_id, result.status, Some(&result));

            let failed = result.status == StepStatus::Failed;
            execution.record(step_id, result);
            *self.current.write() = Some(execution.clone());

            if failed && policy.stop_on_error && *signal.borrow() != RunSignal::Cancel {
                warn!(step = %step_id, "Step failed, stopping run");
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(format!("step {step_id} failed, run stopped"));
                break;
            }

            if index + 1 < step_ids.len() && !interruptible_delay(&mut signal, policy.step_delay).await {
                break;
            }
        }

        if *signal.borrow() == RunSignal::Cancel {
            execution.status = ExecutionStatus::Cancelled;
            execution.error_message = Some("run cancelled".to_string());
        } else if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }
        execution.total_time = started.elapsed();

        info!(
            execution = %execution.execution_id,
            status = %execution.status,
            succeeded = execution.successful_steps.len(),
            failed = execution.failed_steps.len(),
            elapsed_ms = execution.total_time.as_millis() as u64,
            "Calibration run finished"
        );
        *self.current.write() = Some(execution.clone());
        self.history.lock().push(execution.clone());
        execution
    }

    async fn run_step(
        &self,
        step_id: &str,
        params: &CalibrationParameters,
        policy: &RunPolicy,
        signal: &mut watch::Receiver<RunSignal>,
    ) -> StepResult {
        let mut steps = self.steps.lock().await;
        let Some(runner) = steps.iter_mut().find(|r| r.step_id() == step_id) else {
            return StepResult::failed(format!("unknown step {step_id}"), Duration::ZERO)
                .with_retryable(false);
        };

        runner.reset();
        let mut result = runner.execute(self.channel.as_ref(), params).await;
        if result.is_success() || !policy.auto_retry_failed {
            return result;
        }
        if !result.retryable {
            debug!(step = step_id, "Failure is not retryable");
            return result;
        }

        for attempt in 1..=policy.max_step_retries {
            if !interruptible_delay(signal, policy.retry_delay).await {
                debug!(step = step_id, "Retry abandoned on cancel");
                break;
            }
            info!(step = step_id, attempt, "Retrying calibration step");
            runner.reset();
            result = runner.execute(self.channel.as_ref(), params).await;
            if result.is_success() || !result.retryable {
                return result;
            }
        }
        warn!(
            step = step_id,
            retries = policy.max_step_retries,
            "Calibration step failed after retries"
        );
        result
    }
}
