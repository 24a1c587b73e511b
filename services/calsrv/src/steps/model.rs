//! Calibration inputs and step outcomes

use chrono::{DateTime, Utc};
use dlt645::{CalibrationQuantities, ParameterCodec, ParameterKind, ParameterReport};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Test-bench reference values for one calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParameters {
    /// Volts
    pub standard_voltage: f64,
    /// Amperes
    pub standard_current: f64,
    /// Hertz
    pub frequency: f64,
    pub power_factor: f64,
    /// Degrees
    pub phase_angle: f64,
    /// Amperes
    pub no_load_current_threshold: f64,
    /// Amperes
    pub small_current_threshold: f64,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            standard_voltage: 220.0,
            standard_current: 1.0,
            frequency: 50.0,
            power_factor: 1.0,
            phase_angle: 0.0,
            no_load_current_threshold: 0.001,
            small_current_threshold: 0.05,
        }
    }
}

impl CalibrationParameters {
    /// Active power `V * I * PF`, rounded to the wire precision of 0.01 W
    pub fn active_power(&self) -> f64 {
        (self.standard_voltage * self.standard_current * self.power_factor * 100.0).round() / 100.0
    }

    pub fn report(&self) -> ParameterReport {
        ParameterCodec::validate_quantities(&CalibrationQuantities {
            voltage: self.standard_voltage,
            current: self.standard_current,
            frequency: self.frequency,
            phase_angle: self.phase_angle,
            power_factor: self.power_factor,
        })
    }

    /// Check every value a step will encode
    pub fn validate(&self) -> Result<()> {
        if !(self.power_factor > 0.0 && self.power_factor <= 1.0) {
            return Err(crate::error::CalSrvError::config(format!(
                "power factor {} outside (0, 1]",
                self.power_factor
            )));
        }
        ParameterCodec::validate(self.standard_voltage, ParameterKind::Voltage)?;
        ParameterCodec::validate(self.standard_current, ParameterKind::Current)?;
        ParameterCodec::validate(self.frequency, ParameterKind::Frequency)?;
        ParameterCodec::validate(self.phase_angle, ParameterKind::Phase)?;
        ParameterCodec::validate(self.active_power(), ParameterKind::Power)?;
        ParameterCodec::validate(self.no_load_current_threshold, ParameterKind::Current)?;
        ParameterCodec::validate(self.small_current_threshold, ParameterKind::Current)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

fn serialize_hex_opt<S: Serializer>(
    bytes: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&hex::encode_upper(bytes)),
        None => serializer.serialize_none(),
    }
}

fn serialize_millis_opt<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub correction_value: Option<f64>,
    /// Reply frame the correction value came from
    #[serde(serialize_with = "serialize_hex_opt")]
    pub raw_response: Option<Vec<u8>>,
    pub error_message: Option<String>,
    #[serde(rename = "execution_time_ms", serialize_with = "serialize_millis_opt")]
    pub execution_time: Option<Duration>,
    /// Communication retries spent on the successful exchange
    pub communication_retries: u32,
    /// A failure that may clear on another attempt
    pub retryable: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            correction_value: None,
            raw_response: None,
            error_message: None,
            execution_time: None,
            communication_retries: 0,
            retryable: false,
            finished_at: None,
        }
    }

    pub fn success(
        correction_value: f64,
        raw_response: Vec<u8>,
        execution_time: Duration,
        communication_retries: u32,
    ) -> Self {
        Self {
            status: StepStatus::Success,
            correction_value: Some(correction_value),
            raw_response: Some(raw_response),
            execution_time: Some(execution_time),
            communication_retries,
            finished_at: Some(Utc::now()),
            ..Self::pending()
        }
    }

    pub fn failed(error_message: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            status: StepStatus::Failed,
            error_message: Some(error_message.into()),
            execution_time: Some(execution_time),
            retryable: true,
            finished_at: Some(Utc::now()),
            ..Self::pending()
        }
    }

    /// Mark whether running the step again could change the outcome
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            error_message: Some(reason.into()),
            finished_at: Some(Utc::now()),
            ..Self::pending()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Plain key-value form for reporting
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
