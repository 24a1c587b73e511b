//! Progress reporting for running steps

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::steps::{StepResult, StepStatus};

/// Receives a `Running` notification and then the terminal status of every executed step
pub trait ProgressObserver: Send + Sync {
    fn on_progress(
        &self,
        step_id: &str,
        status: StepStatus,
        result: Option<&StepResult>,
    ) -> anyhow::Result<()>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, StepStatus, Option<&StepResult>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(
        &self,
        step_id: &str,
        status: StepStatus,
        result: Option<&StepResult>,
    ) -> anyhow::Result<()> {
        self(step_id, status, result)
    }
}

/// Observer that ignores all notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _: &str, _: StepStatus, _: Option<&StepResult>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Owned form of one progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step_id: String,
    pub status: StepStatus,
    pub result: Option<StepResult>,
}

/// Forwards notifications into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver(pub UnboundedSender<ProgressEvent>);

impl ProgressObserver for ChannelObserver {
    fn on_progress(
        &self,
        step_id: &str,
        status: StepStatus,
        result: Option<&StepResult>,
    ) -> anyhow::Result<()> {
        self.0
            .send(ProgressEvent {
                step_id: step_id.to_string(),
                status,
                result: result.cloned(),
            })
            .map_err(|_| anyhow::anyhow!("progress receiver dropped"))
    }
}

/// Deliver one notification. Observer errors and panics are logged and swallowed.
pub(crate) fn notify(
    observer: &dyn ProgressObserver,
    step_id: &str,
    status: StepStatus,
    result: Option<&StepResult>,
) {
    match catch_unwind(AssertUnwindSafe(|| {
        observer.on_progress(step_id, status, result)
    })) {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!(step = step_id, error = %e, "Progress observer failed"),
        Err(_) => warn!(step = step_id, "Progress observer panicked"),
    }
}
