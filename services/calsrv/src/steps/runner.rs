//! Per-step lifecycle

use dlt645::DataIdentifier;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{CalibrationParameters, CalibrationStep, StepResult, StepStatus};
use crate::communicator::{CommandChannel, CommandResponse};
use crate::error::{CalSrvError, Result};

/// Descriptive view of a step and its last outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub step_id: String,
    pub name: String,
    pub description: String,
    pub data_identifier: DataIdentifier,
    pub status: StepStatus,
    pub result: Option<StepResult>,
}

/// A step together with its status and last result
#[derive(Debug)]
pub struct StepRunner {
    step: Box<dyn CalibrationStep>,
    status: StepStatus,
    result: Option<StepResult>,
}

impl StepRunner {
    pub fn new(step: Box<dyn CalibrationStep>) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            result: None,
        }
    }

    pub fn step(&self) -> &dyn CalibrationStep {
        self.step.as_ref()
    }

    pub fn step_id(&self) -> &'static str {
        self.step.step_id()
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    /// Run prepare, send and process. Errors end up in the returned result.
    pub async fn execute(
        &mut self,
        channel: &dyn CommandChannel,
        params: &CalibrationParameters,
    ) -> StepResult {
        let step_id = self.step.step_id();
        self.status = StepStatus::Running;
        self.result = None;
        info!(step = step_id, name = self.step.name(), "Starting calibration step");

        let started = Instant::now();
        let result = match self.run(channel, params).await {
            Ok((value, response)) => {
                info!(
                    step = step_id,
                    correction = value,
                    retries = response.retry_count,
                    "Calibration step succeeded"
                );
                StepResult::success(value, response.frame, started.elapsed(), response.retry_count)
            },
            Err(e) => {
                warn!(
                    step = step_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Calibration step failed"
                );
                StepResult::failed(e.to_string(), started.elapsed()).with_retryable(e.is_retryable())
            },
        };

        self.status = result.status;
        self.result = Some(result.clone());
        result
    }

    async fn run(
        &self,
        channel: &dyn CommandChannel,
        params: &CalibrationParameters,
    ) -> Result<(f64, CommandResponse)> {
        let identifier = self.step.data_identifier();
        let parameter_bytes = self.step.prepare_parameters(params)?;
        debug!(
            step = self.step.step_id(),
            identifier = %identifier,
            params = %hex::encode_upper(&parameter_bytes),
            "Prepared step parameters"
        );

        let response = channel.send_command(identifier, &parameter_bytes).await?;
        check_echoed_identifier(identifier, &response.payload)?;

        let value = self.step.process_response(&response.payload)?;
        Ok((value, response))
    }

    /// Mark skipped without contacting the meter
    pub fn skip(&mut self, reason: impl Into<String>) -> StepResult {
        let result = StepResult::skipped(reason);
        self.status = StepStatus::Skipped;
        self.result = Some(result.clone());
        result
    }

    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
    }

    pub fn summary(&self) -> StepSummary {
        StepSummary {
            step_id: self.step.step_id().to_string(),
            name: self.step.name().to_string(),
            description: self.step.description().to_string(),
            data_identifier: self.step.data_identifier(),
            status: self.status,
            result: self.result.clone(),
        }
    }
}

/// A reply carrying an identifier must echo the one that was sent
fn check_echoed_identifier(sent: DataIdentifier, payload: &[u8]) -> Result<()> {
    let Some(wire) = payload.get(..4) else {
        return Ok(());
    };
    let echoed = DataIdentifier::from_wire_bytes([wire[0], wire[1], wire[2], wire[3]]);
    if echoed != sent {
        return Err(CalSrvError::invalid_response(format!(
            "reply identifier {echoed} does not match {sent}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::communicator::{CommunicationConfig, Communicator};
    use crate::error::CommError;
    use crate::steps::{PowerGainStep, VoltageCurrentGainStep};
    use crate::test_support::meter_reply;
    use crate::transport::MockTransport;
    use async_trait::async_trait;
    use dlt645::FrameParser;
    use std::time::Duration;

    /// Channel answering every command with a fixed correction value
    #[derive(Debug)]
    struct FixedChannel {
        value: Vec<u8>,
        fail: bool,
    }

    #[async_trait]
    impl CommandChannel for FixedChannel {
        async fn send_command(
            &self,
            identifier: DataIdentifier,
            _parameter_bytes: &[u8],
        ) -> Result<CommandResponse> {
            if self.fail {
                return Err(CalSrvError::Communication {
                    attempts: 1,
                    retry_count: 0,
                    last: CommError::Timeout { timeout_ms: 10 },
                });
            }
            let mut payload = identifier.wire_bytes().to_vec();
            payload.extend_from_slice(&self.value);
            Ok(CommandResponse {
                frame: vec![0x68],
                parsed: FrameParser::parse(&[]),
                payload,
                retry_count: 0,
                elapsed: Duration::from_millis(1),
            })
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let channel = FixedChannel {
            value: 10012u32.to_le_bytes().to_vec(),
            fail: false,
        };
        let mut runner = StepRunner::new(Box::new(VoltageCurrentGainStep));
        let result = runner
            .execute(&channel, &CalibrationParameters::default())
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.correction_value, Some(1.0012));
        assert_eq!(runner.status(), StepStatus::Success);
        assert_eq!(runner.result(), Some(&result));
    }

    #[tokio::test]
    async fn test_execute_failure_is_recorded() {
        let channel = FixedChannel {
            value: Vec::new(),
            fail: true,
        };
        let mut runner = StepRunner::new(Box::new(PowerGainStep));
        let result = runner
            .execute(&channel, &CalibrationParameters::default())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error_message.unwrap().contains("1 attempts"));
        assert!(result.execution_time.is_some());
        assert_eq!(runner.status(), StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_parameters_fail_before_sending() {
        let transport = MockTransport::connected();
        let meter = transport.handle();
        let comm = Communicator::new(Box::new(transport), CommunicationConfig::default()).unwrap();
        let params = CalibrationParameters {
            standard_current: 500.0,
            ..Default::default()
        };

        let mut runner = StepRunner::new(Box::new(VoltageCurrentGainStep));
        let result = runner.execute(&comm, &params).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(meter.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_against_communicator() {
        let transport = MockTransport::connected();
        let meter = transport.handle();
        meter.set_responder(|request| vec![meter_reply(request, &22000u32.to_le_bytes())]);
        let comm = Communicator::new(Box::new(transport), CommunicationConfig::default()).unwrap();

        let mut runner = StepRunner::new(Box::new(PowerGainStep));
        let result = runner
            .execute(&comm, &CalibrationParameters::default())
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.correction_value, Some(2.2));
        let raw = result.raw_response.unwrap();
        assert!(FrameParser::parse(&raw).is_success());
    }

    #[test]
    fn test_mismatched_echo_rejected() {
        let sent = DataIdentifier::from_bytes([0x00, 0xF8, 0x16, 0x00]);
        let other = DataIdentifier::from_bytes([0x00, 0xF8, 0x17, 0x00]);
        assert!(check_echoed_identifier(sent, &sent.wire_bytes()).is_ok());
        assert!(check_echoed_identifier(sent, &other.wire_bytes()).is_err());
        assert!(check_echoed_identifier(sent, &[]).is_ok());
    }

    #[test]
    fn test_skip_and_reset() {
        let mut runner = StepRunner::new(Box::new(VoltageCurrentGainStep));
        let result = runner.skip("meter not loaded");
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(runner.summary().status, StepStatus::Skipped);

        runner.reset();
        let summary = runner.summary();
        assert_eq!(summary.status, StepStatus::Pending);
        assert!(summary.result.is_none());
        assert_eq!(summary.data_identifier.to_string(), "00F81600");
    }
}
