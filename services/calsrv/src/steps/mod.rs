//! Calibration step engine
//!
//! Each physical calibration operation is a [`CalibrationStep`]: it knows the data
//! identifier it is addressed by, how to encode the bench reference values for the
//! meter and how to read the correction value out of the reply. [`StepRunner`] adds
//! the per-step lifecycle on top.

mod model;
mod runner;
mod variants;

use dlt645::{DataIdentifier, WireEncoding};
use std::fmt;

use crate::error::{CalSrvError, Result};

pub use model::{CalibrationParameters, StepResult, StepStatus};
pub use runner::{StepRunner, StepSummary};
pub use variants::{
    CurrentOffsetStep, PhaseCompensationStep, PowerGainStep, SmallCurrentBiasStep,
    VoltageCurrentGainStep,
};

/// Offset of the correction value in a reply payload, after the echoed identifier
const CORRECTION_OFFSET: usize = 4;

/// Layout of the correction value a meter reports back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionFormat {
    pub encoding: WireEncoding,
    pub divisor: f64,
    /// Value reported when the meter only acknowledges the command
    pub neutral: f64,
}

impl CorrectionFormat {
    pub const fn new(encoding: WireEncoding, divisor: f64, neutral: f64) -> Self {
        Self {
            encoding,
            divisor,
            neutral,
        }
    }

    /// Decode the correction value from a reply payload (offset already removed)
    pub fn decode(&self, payload: &[u8]) -> Result<f64> {
        let value = payload.get(CORRECTION_OFFSET..).unwrap_or_default();
        if value.is_empty() {
            return Ok(self.neutral);
        }

        let raw = self.encoding.read(value).ok_or_else(|| {
            CalSrvError::invalid_response(format!(
                "correction value truncated: {} of {} bytes",
                value.len(),
                self.encoding.width()
            ))
        })?;
        Ok(raw / self.divisor)
    }
}

/// One calibration operation on the meter
pub trait CalibrationStep: fmt::Debug + Send + Sync {
    /// Stable id such as `step1`
    fn step_id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn data_identifier(&self) -> DataIdentifier;

    /// Parameter bytes sent after the identifier
    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>>;

    fn correction_format(&self) -> CorrectionFormat;

    /// Extract the correction value from a reply payload
    fn process_response(&self, payload: &[u8]) -> Result<f64> {
        self.correction_format().decode(payload)
    }
}

/// The five calibration steps in run order
pub fn create_all_steps() -> Vec<Box<dyn CalibrationStep>> {
    vec![
        Box::new(CurrentOffsetStep),
        Box::new(VoltageCurrentGainStep),
        Box::new(PowerGainStep),
        Box::new(PhaseCompensationStep),
        Box::new(SmallCurrentBiasStep),
    ]
}
