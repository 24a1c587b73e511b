//! Device communicator
//!
//! Runs one calibration command exchange at a time: build the frame, write it, read
//! until a complete frame arrives or the attempt times out, validate the reply against
//! the request, and retry on any communication failure.
//!
//! State per command: `Idle -> Busy -> Idle | Error`. A second command while one is in
//! flight is rejected with [`CalSrvError::Busy`] instead of being interleaved.

use async_trait::async_trait;
use bytes::BytesMut;
use dlt645::{
    compare_frames, scan_frame, DataIdentifier, DeviceAddress, FrameBuilder, FrameParser,
    FrameScan, ParsedFrame, DEFAULT_CONTROL_CODE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CalSrvError, CommError, Result};
use crate::transport::{Transport, TransportError};

/// Identifier used by the link self-test (no-load offset, no parameters)
const LINK_TEST_IDENTIFIER: DataIdentifier = DataIdentifier::from_bytes([0x00, 0xF8, 0x15, 0x00]);
const RECEIVE_CHUNK: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    /// Per-attempt response deadline
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause after a read that returned no bytes
    pub poll_interval_ms: u64,
    pub validate_response: bool,
    /// Printed meter address, 12 hex digits
    pub address: String,
    pub control_code: u8,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            max_retries: 3,
            retry_delay_ms: 500,
            poll_interval_ms: 10,
            validate_response: true,
            address: "111111111111".to_string(),
            control_code: DEFAULT_CONTROL_CODE,
        }
    }
}

impl CommunicationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(CalSrvError::config("communication.timeout_ms must be greater than zero"));
        }
        self.address.parse::<DeviceAddress>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CommunicationStatus {
    Idle = 0,
    Busy = 1,
    Error = 2,
}

impl CommunicationStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CommunicationStatus::Busy,
            2 => CommunicationStatus::Error,
            _ => CommunicationStatus::Idle,
        }
    }
}

/// A validated reply to a calibration command
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// Reply frame as received, preamble stripped
    pub frame: Vec<u8>,
    pub parsed: ParsedFrame,
    /// Reply data field with the wire offset removed
    pub payload: Vec<u8>,
    /// Zero-based index of the attempt that succeeded
    pub retry_count: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunicationStats {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub failed_commands: u64,
    pub total_retries: u64,
    pub success_rate_percent: f64,
    pub average_retries: f64,
    pub status: CommunicationStatus,
}

/// Outcome of [`Communicator::test_communication`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunicationTestReport {
    pub success: bool,
    pub response_received: bool,
    pub response_valid: bool,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, Default)]
struct CommandCounters {
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// The command/response contract the calibration steps depend on
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn send_command(
        &self,
        identifier: DataIdentifier,
        parameter_bytes: &[u8],
    ) -> Result<CommandResponse>;
}

/// Drives calibration commands over a [`Transport`]
#[derive(Debug)]
pub struct Communicator {
    transport: Mutex<Box<dyn Transport>>,
    config: CommunicationConfig,
    builder: FrameBuilder,
    status: AtomicU8,
    counters: CommandCounters,
}

impl Communicator {
    pub fn new(transport: Box<dyn Transport>, config: CommunicationConfig) -> Result<Self> {
        config.validate()?;
        let address = config.address.parse::<DeviceAddress>()?;
        let builder = FrameBuilder::new()
            .with_address(address)
            .with_control_code(config.control_code);

        Ok(Self {
            transport: Mutex::new(transport),
            config,
            builder,
            status: AtomicU8::new(CommunicationStatus::Idle as u8),
            counters: CommandCounters::default(),
        })
    }

    pub fn config(&self) -> &CommunicationConfig {
        &self.config
    }

    pub fn status(&self) -> CommunicationStatus {
        CommunicationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: CommunicationStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub async fn connect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.disconnect().await?;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected().await
    }

    pub async fn transport_diagnostics(&self) -> HashMap<String, String> {
        self.transport.lock().await.diagnostics().await
    }

    /// Send a calibration command given its textual identifier, e.g. `00F81600`.
    pub async fn send_calibration_command(
        &self,
        data_identifier: &str,
        parameter_bytes: &[u8],
    ) -> Result<CommandResponse> {
        let identifier = data_identifier.parse::<DataIdentifier>()?;
        self.send_command(identifier, parameter_bytes).await
    }

    /// Send a calibration command and wait for a validated reply.
    ///
    /// # Errors
    ///
    /// * `Codec` - the frame could not be built, nothing was sent
    /// * `Busy` - another command is in flight
    /// * `NotConnected` - the transport is closed
    /// * `Communication` - every attempt failed; carries the last attempt's error
    pub async fn send_command(
        &self,
        identifier: DataIdentifier,
        parameter_bytes: &[u8],
    ) -> Result<CommandResponse> {
        let request = self.builder.build_with(identifier, parameter_bytes)?;

        let mut transport = self
            .transport
            .try_lock()
            .map_err(|_| CalSrvError::busy("another command is in flight"))?;
        if !transport.is_connected().await {
            return Err(CalSrvError::NotConnected);
        }

        self.set_status(CommunicationStatus::Busy);
        info!(
            di = %identifier,
            params = %hex::encode_upper(parameter_bytes),
            "Sending calibration command"
        );
        let started = Instant::now();
        let outcome = self.exchange_with_retry(&mut **transport, &request).await;
        drop(transport);

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(mut response) => {
                response.elapsed = started.elapsed();
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .retries
                    .fetch_add(u64::from(response.retry_count), Ordering::Relaxed);
                self.set_status(CommunicationStatus::Idle);
                info!(
                    di = %identifier,
                    retries = response.retry_count,
                    elapsed_ms = response.elapsed.as_millis() as u64,
                    "Calibration command acknowledged"
                );
                Ok(response)
            },
            Err((attempts, last)) => {
                let retry_count = attempts.saturating_sub(1);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .retries
                    .fetch_add(u64::from(retry_count), Ordering::Relaxed);
                self.set_status(CommunicationStatus::Error);
                warn!(di = %identifier, attempts, error = %last, "Calibration command failed");
                Err(CalSrvError::Communication {
                    attempts,
                    retry_count,
                    last,
                })
            },
        }
    }

    async fn exchange_with_retry(
        &self,
        transport: &mut dyn Transport,
        request: &[u8],
    ) -> std::result::Result<CommandResponse, (u32, CommError)> {
        let attempts = self.config.max_retries.saturating_add(1);
        let request_parsed = FrameParser::parse(request);
        let mut last_error = CommError::Timeout {
            timeout_ms: self.config.timeout_ms,
        };

        for attempt in 0..attempts {
            if attempt > 0 && !self.config.retry_delay().is_zero() {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
            debug!(attempt = attempt + 1, attempts, "Communication attempt");

            let result = match self.exchange_once(transport, request).await {
                Ok(frame) => self
                    .check_response(&request_parsed, &frame)
                    .map(|parsed| (frame, parsed)),
                Err(e) => Err(e),
            };

            match result {
                Ok((frame, parsed)) => {
                    return Ok(CommandResponse {
                        payload: parsed.payload(),
                        frame,
                        parsed,
                        retry_count: attempt,
                        elapsed: Duration::ZERO,
                    })
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, attempts, error = %e, "Communication attempt failed");
                    last_error = e;
                },
            }
        }

        Err((attempts, last_error))
    }

    async fn exchange_once(
        &self,
        transport: &mut dyn Transport,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, CommError> {
        transport.discard_input().await?;
        transport.send(request).await?;
        debug!(frame = %hex::encode_upper(request), "Tx>");

        let deadline = Instant::now() + self.config.timeout();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut received = BytesMut::with_capacity(RECEIVE_CHUNK);
        let mut chunk = [0u8; RECEIVE_CHUNK];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.receive(&mut chunk, Some(remaining)).await {
                Ok(0) => tokio::time::sleep(poll_interval.min(remaining)).await,
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    if let FrameScan::Complete { start, end } = scan_frame(&received) {
                        let frame = received[start..end].to_vec();
                        debug!(frame = %hex::encode_upper(&frame), "Rx<");
                        return Ok(frame);
                    }
                },
                Err(TransportError::Timeout(_)) => break,
                Err(e) => return Err(CommError::Transport(e)),
            }
        }

        if received.is_empty() {
            Err(CommError::Timeout {
                timeout_ms: self.config.timeout_ms,
            })
        } else {
            warn!(partial = %hex::encode_upper(&received), "Incomplete response");
            Err(CommError::IncompleteResponse {
                received: received.len(),
            })
        }
    }

    fn check_response(
        &self,
        request: &ParsedFrame,
        frame: &[u8],
    ) -> std::result::Result<ParsedFrame, CommError> {
        let parsed = FrameParser::parse(frame);
        if !self.config.validate_response {
            return Ok(parsed);
        }

        if !parsed.is_success() {
            return Err(CommError::ResponseValidation(format!(
                "{:?}: {}",
                parsed.result,
                parsed.error_message.as_deref().unwrap_or("unparseable frame")
            )));
        }

        let comparison = compare_frames(request, &parsed);
        if !comparison.address_match {
            return Err(CommError::ResponseValidation(format!(
                "Address mismatch: expected {}, got {}",
                self.builder.address(),
                parsed
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_default()
            )));
        }
        if !comparison.control_match {
            return Err(CommError::ResponseValidation(format!(
                "Control code mismatch: expected 0x{:02X}, got 0x{:02X}",
                comparison.expected_control.unwrap_or_default(),
                comparison.actual_control.unwrap_or_default()
            )));
        }
        if !parsed.checksum_valid {
            return Err(CommError::ResponseValidation(
                "Response checksum invalid".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Probe the link with the no-load offset command and no parameters.
    pub async fn test_communication(&self) -> CommunicationTestReport {
        info!("Starting communication test");
        let started = Instant::now();
        let result = self.send_command(LINK_TEST_IDENTIFIER, &[]).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => CommunicationTestReport {
                success: true,
                response_received: true,
                response_valid: response.parsed.is_success(),
                error_message: None,
                retry_count: response.retry_count,
                response_time_ms,
            },
            Err(e) => CommunicationTestReport {
                success: false,
                response_received: matches!(
                    e.last_comm_error(),
                    Some(CommError::ResponseValidation(_) | CommError::IncompleteResponse { .. })
                ),
                response_valid: false,
                retry_count: match &e {
                    CalSrvError::Communication { retry_count, .. } => *retry_count,
                    _ => 0,
                },
                error_message: Some(e.to_string()),
                response_time_ms,
            },
        }
    }

    pub fn statistics(&self) -> CommunicationStats {
        let total = self.counters.sent.load(Ordering::Relaxed);
        let succeeded = self.counters.succeeded.load(Ordering::Relaxed);
        let retries = self.counters.retries.load(Ordering::Relaxed);
        let (success_rate_percent, average_retries) = if total > 0 {
            (
                (succeeded as f64 / total as f64 * 10_000.0).round() / 100.0,
                retries as f64 / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        CommunicationStats {
            total_commands: total,
            successful_commands: succeeded,
            failed_commands: self.counters.failed.load(Ordering::Relaxed),
            total_retries: retries,
            success_rate_percent,
            average_retries,
            status: self.status(),
        }
    }

    pub fn reset_statistics(&self) {
        self.counters.sent.store(0, Ordering::Relaxed);
        self.counters.succeeded.store(0, Ordering::Relaxed);
        self.counters.failed.store(0, Ordering::Relaxed);
        self.counters.retries.store(0, Ordering::Relaxed);
        info!("Communication statistics reset");
    }
}

#[async_trait]
impl CommandChannel for Communicator {
    async fn send_command(
        &self,
        identifier: DataIdentifier,
        parameter_bytes: &[u8],
    ) -> Result<CommandResponse> {
        Communicator::send_command(self, identifier, parameter_bytes).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_support::{meter_reply, meter_reply_with_control};
    use crate::transport::{MockTransport, MockTransportHandle};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_config() -> CommunicationConfig {
        CommunicationConfig {
            timeout_ms: 40,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn communicator(config: CommunicationConfig) -> (Communicator, MockTransportHandle) {
        let transport = MockTransport::connected();
        let handle = transport.handle();
        (Communicator::new(Box::new(transport), config).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| vec![meter_reply(request, &[0x10, 0x27, 0x00, 0x00])]);

        let response = comm.send_calibration_command("00F81600", &[]).await.unwrap();
        assert_eq!(response.retry_count, 0);
        assert_eq!(&response.payload[..4], &[0x00, 0x16, 0xF8, 0x00]);
        assert_eq!(&response.payload[4..], &[0x10, 0x27, 0x00, 0x00]);
        assert_eq!(
            hex::encode_upper(&meter.sent_frames()[0]),
            "6811111111111168140D33492B33333333333433333333FD16"
        );

        let stats = comm.statistics();
        assert_eq!(stats.total_commands, 1);
        assert_eq!(stats.successful_commands, 1);
        assert_eq!(stats.success_rate_percent, 100.0);
        assert_eq!(comm.status(), CommunicationStatus::Idle);
    }

    #[tokio::test]
    async fn test_silent_meter_exhausts_retries() {
        let (comm, meter) = communicator(fast_config());

        let err = comm.send_calibration_command("00F81500", &[]).await.unwrap_err();
        match err {
            CalSrvError::Communication {
                attempts,
                retry_count,
                ref last,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(retry_count, 3);
                assert_eq!(*last, CommError::Timeout { timeout_ms: 40 });
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_timeout());
        assert_eq!(meter.sent_count(), 4);

        let stats = comm.statistics();
        assert_eq!(stats.failed_commands, 1);
        assert_eq!(stats.total_retries, 3);
        assert_eq!(comm.status(), CommunicationStatus::Error);
    }

    #[tokio::test]
    async fn test_address_mismatch_is_retried() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| {
            let mut reply = meter_reply(request, &[]);
            reply[1] = 0x22;
            let cs = reply.len() - 2;
            reply[cs] = dlt645::frame::checksum(&reply[..cs]);
            vec![reply]
        });

        let err = comm.send_calibration_command("00F81500", &[]).await.unwrap_err();
        assert!(matches!(
            err.last_comm_error(),
            Some(CommError::ResponseValidation(msg)) if msg.contains("Address mismatch")
        ));
        assert_eq!(meter.sent_count(), 4);
    }

    #[tokio::test]
    async fn test_control_code_mismatch_is_retried() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| vec![meter_reply_with_control(request, 0x91, &[])]);

        let err = comm.send_calibration_command("00F81500", &[]).await.unwrap_err();
        assert!(matches!(
            err.last_comm_error(),
            Some(CommError::ResponseValidation(msg)) if msg.contains("0x94")
        ));
        assert_eq!(meter.sent_count(), 4);
    }

    #[tokio::test]
    async fn test_validation_disabled_accepts_foreign_reply() {
        let config = CommunicationConfig {
            validate_response: false,
            ..fast_config()
        };
        let (comm, meter) = communicator(config);
        meter.set_responder(|request| vec![meter_reply_with_control(request, 0x91, &[])]);

        let response = comm.send_calibration_command("00F81500", &[]).await.unwrap();
        assert_eq!(response.parsed.control_code, Some(0x91));
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let (comm, meter) = communicator(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        meter.set_responder(move |request| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Vec::new()
            } else {
                vec![meter_reply(request, &[])]
            }
        });

        let response = comm.send_calibration_command("00F81500", &[]).await.unwrap();
        assert_eq!(response.retry_count, 2);
        assert_eq!(comm.statistics().total_retries, 2);
    }

    #[tokio::test]
    async fn test_fragmented_reply_with_preamble() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| {
            let reply = meter_reply(request, &[0x01, 0x00, 0x00, 0x00]);
            let mut first = vec![0xFE, 0xFE, 0xFE, 0xFE];
            first.extend_from_slice(&reply[..6]);
            vec![first, reply[6..15].to_vec(), reply[15..].to_vec()]
        });

        let response = comm.send_calibration_command("00F81500", &[]).await.unwrap();
        assert_eq!(response.frame[0], 0x68);
        assert_eq!(&response.payload[4..], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_stale_input_is_discarded_before_sending() {
        let (comm, meter) = communicator(fast_config());
        meter.add_receive_data(vec![0x68, 0x22, 0x22]);
        meter.set_responder(|request| vec![meter_reply(request, &[])]);

        let response = comm.send_calibration_command("00F81500", &[]).await.unwrap();
        assert_eq!(response.retry_count, 0);
        assert_eq!(response.frame[1], 0x11);
    }

    #[tokio::test]
    async fn test_partial_reply_is_incomplete() {
        let config = CommunicationConfig {
            max_retries: 0,
            ..fast_config()
        };
        let (comm, meter) = communicator(config);
        meter.set_responder(|request| vec![meter_reply(request, &[])[..8].to_vec()]);

        let err = comm.send_calibration_command("00F81500", &[]).await.unwrap_err();
        assert_eq!(
            err.last_comm_error(),
            Some(&CommError::IncompleteResponse { received: 8 })
        );
    }

    #[tokio::test]
    async fn test_unbounded_retry_setting_answers_first_time() {
        let config = CommunicationConfig {
            max_retries: u32::MAX,
            ..fast_config()
        };
        let (comm, meter) = communicator(config);
        meter.set_responder(|request| vec![meter_reply(request, &[])]);

        let response = comm.send_calibration_command("00F81500", &[]).await.unwrap();
        assert_eq!(response.retry_count, 0);
        assert_eq!(meter.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let (comm, meter) = communicator(fast_config());
        meter.set_connected(false);

        let err = comm.send_calibration_command("00F81500", &[]).await.unwrap_err();
        assert!(matches!(err, CalSrvError::NotConnected));
        assert_eq!(meter.sent_count(), 0);
        assert_eq!(comm.statistics().total_commands, 0);
    }

    #[tokio::test]
    async fn test_bad_identifier_never_reaches_the_wire() {
        let (comm, meter) = communicator(fast_config());
        let err = comm.send_calibration_command("00F815", &[]).await.unwrap_err();
        assert!(matches!(err, CalSrvError::Codec(_)));
        assert_eq!(meter.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_command_is_rejected() {
        let config = CommunicationConfig {
            timeout_ms: 200,
            max_retries: 0,
            ..fast_config()
        };
        let (comm, _meter) = communicator(config);
        let comm = Arc::new(comm);

        let first = {
            let comm = Arc::clone(&comm);
            tokio::spawn(async move { comm.send_calibration_command("00F81500", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(comm.status(), CommunicationStatus::Busy);

        let second = comm.send_calibration_command("00F81600", &[]).await;
        assert!(matches!(second, Err(CalSrvError::Busy(_))));

        let first = first.await.unwrap();
        assert!(first.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_statistics_reset() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| vec![meter_reply(request, &[])]);
        comm.send_calibration_command("00F81500", &[]).await.unwrap();
        comm.send_calibration_command("00F81700", &[]).await.unwrap();
        assert_eq!(comm.statistics().total_commands, 2);

        comm.reset_statistics();
        let stats = comm.statistics();
        assert_eq!(stats.total_commands, 0);
        assert_eq!(stats.average_retries, 0.0);
    }

    #[tokio::test]
    async fn test_link_self_test() {
        let (comm, meter) = communicator(fast_config());
        meter.set_responder(|request| vec![meter_reply(request, &[])]);
        let report = comm.test_communication().await;
        assert!(report.success);
        assert!(report.response_valid);
        assert_eq!(
            hex::encode_upper(&meter.sent_frames()[0]),
            "6811111111111168140D33482B33333333333433333333FC16"
        );

        meter.clear_responder();
        let report = comm.test_communication().await;
        assert!(!report.success);
        assert!(!report.response_received);
        assert_eq!(report.retry_count, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(CommunicationConfig::default().validate().is_ok());
        let config = CommunicationConfig {
            address: "12345".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CalSrvError::Codec(_))));
    }
}
