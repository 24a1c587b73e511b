//! Meter Calibration Service Library (calsrv)
//!
//! Drives the calibration of DL/T645-style electricity meters over a serial line.
//! Frames and parameter encodings come from the `dlt645` crate; this crate adds the
//! I/O side and the calibration workflow.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │    Executor     │───►│ CalibrationStep │───►│  Communicator   │
//! │ (batch/1-click) │    │   (step1..5)    │    │ (retry/timeout) │
//! └─────────────────┘    └─────────────────┘    └────────┬────────┘
//!                                                        ▼
//!                                               ┌─────────────────┐
//!                                               │    Transport    │
//!                                               │ (serial / mock) │
//!                                               └─────────────────┘
//! ```
//!
//! - **`transport`**: byte channel to the meter
//! - **`communicator`**: one command, one validated reply, with retries
//! - **`steps`**: the five calibration operations and their lifecycle
//! - **`executor`**: sequencing, retry policy, pause/cancel and history
//! - **`config`** / **`logging`**: service bootstrap

pub mod communicator;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod steps;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use communicator::{
    CommandChannel, CommandResponse, CommunicationConfig, CommunicationStats,
    CommunicationStatus, CommunicationTestReport, Communicator,
};
pub use config::{CalsrvConfig, LoggingConfig};
pub use error::{CalSrvError, CommError, Result};
pub use executor::{
    CalibrationExecutor, ChannelObserver, ExecutionConfig, ExecutionResult,
    ExecutionStatistics, ExecutionStatus, NoopObserver, ProgressEvent, ProgressObserver,
};
pub use steps::{
    create_all_steps, CalibrationParameters, CalibrationStep, StepResult, StepRunner, StepStatus,
    StepSummary,
};
pub use transport::{SerialTransport, SerialTransportConfig, Transport, TransportError};
