//! Serial Transport Implementation
//!
//! RS-485 / optical-probe access to a meter through `tokio-serial`. DL/T645 meters
//! default to 8 data bits, even parity and 1 stop bit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use super::traits::{ConnectionState, Transport, TransportConfig, TransportError, TransportStats};

/// How long `discard_input` keeps reading before it considers the line quiet
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Parity of the meter line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(alias = "none")]
    None,
    #[default]
    #[serde(alias = "even")]
    Even,
    #[serde(alias = "odd")]
    Odd,
}

impl Parity {
    /// Letter used in `8E1`-style notation
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    #[serde(alias = "none")]
    None,
    #[serde(alias = "software")]
    Software,
    #[serde(alias = "hardware")]
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial line to the meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialTransportConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    /// 5 to 8
    pub data_bits: u8,
    /// 1 or 2
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Read deadline when the caller passes none
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
            flow_control: FlowControl::None,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

impl TransportConfig for SerialTransportConfig {
    fn name(&self) -> &str {
        &self.port
    }

    fn validate(&self) -> Result<(), TransportError> {
        let problem = if self.port.trim().is_empty() {
            Some("port path cannot be empty".to_string())
        } else if self.baud_rate == 0 {
            Some("baud rate must be greater than zero".to_string())
        } else if !(5..=8).contains(&self.data_bits) {
            Some(format!("data bits must be 5 to 8, got {}", self.data_bits))
        } else if !(1..=2).contains(&self.stop_bits) {
            Some(format!("stop bits must be 1 or 2, got {}", self.stop_bits))
        } else if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            Some("read and write timeouts must be greater than zero".to_string())
        } else {
            None
        };

        match problem {
            Some(message) => Err(TransportError::ConfigError(format!(
                "serial {}: {message}",
                self.port
            ))),
            None => Ok(()),
        }
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SerialTransportConfig {
    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Line settings in `8E1` notation
    pub fn frame_format(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// Serial transport implementation
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
    port: Option<SerialStream>,
    stats: TransportStats,
}

impl SerialTransport {
    pub fn new(config: SerialTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        Ok(Self {
            config,
            port: None,
            stats: TransportStats::new(),
        })
    }

    pub fn config(&self) -> &SerialTransportConfig {
        &self.config
    }

    /// Forget a port that failed mid-operation; the next command reports not connected
    fn drop_broken_port(&mut self) {
        self.port = None;
        self.stats.connection_state = ConnectionState::Error;
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn transport_type(&self) -> &str {
        "serial"
    }

    fn name(&self) -> &str {
        &self.config.port
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Opening serial port: {}", self.config.port);

        let port_result = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(self.config.data_bits())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits())
            .flow_control(self.config.flow_control.into())
            .timeout(self.config.read_timeout())
            .open_native_async();

        match port_result {
            Ok(mut port) => {
                #[cfg(unix)]
                port.set_exclusive(false).map_err(|e| {
                    TransportError::IoError(format!("Failed to set exclusive mode: {e}"))
                })?;

                self.port = Some(port);
                self.stats.record_successful_connection();
                info!(
                    port = %self.config.port,
                    baud_rate = self.config.baud_rate,
                    format = %self.config.frame_format(),
                    "Serial port opened"
                );
                Ok(())
            },
            Err(e) => {
                let error_msg = format!("Failed to open serial port {}: {e}", self.config.port);
                error!("{error_msg}");
                self.stats.record_failed_connection();
                Err(TransportError::ConnectionFailed(error_msg))
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            self.stats.record_disconnection();
            info!("Closed serial port: {}", self.config.port);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let write_timeout = self.config.write_timeout();
        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::SendFailed(
                "Serial port not connected".to_string(),
            ));
        };

        let send_operation = async {
            port.write_all(data).await?;
            port.flush().await?;
            Ok::<_, std::io::Error>(data.len())
        };

        let result = timeout(write_timeout, send_operation).await;
        match result {
            Ok(Ok(bytes_sent)) => {
                self.stats.record_bytes_sent(bytes_sent);
                debug!(hex_data = %hex::encode_upper(data), length = bytes_sent, direction = "send", "[Serial Transport] Raw packet");
                Ok(bytes_sent)
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to send data: {e}");
                error!("{error_msg}");
                self.drop_broken_port();
                Err(TransportError::SendFailed(error_msg))
            },
            Err(_) => {
                let error_msg = format!("Send operation timed out after {write_timeout:?}");
                warn!("{error_msg}");
                Err(TransportError::Timeout(error_msg))
            },
        }
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout_duration: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let receive_timeout = timeout_duration.unwrap_or(self.config.read_timeout());
        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "Serial port not connected".to_string(),
            ));
        };

        let result = timeout(receive_timeout, port.read(buffer)).await;
        match result {
            Ok(Ok(0)) => Ok(0),
            Ok(Ok(bytes_read)) => {
                self.stats.record_bytes_received(bytes_read);
                debug!(hex_data = %hex::encode_upper(&buffer[..bytes_read]), length = bytes_read, direction = "recv", "[Serial Transport] Raw packet");
                Ok(bytes_read)
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to receive data: {e}");
                error!("{error_msg}");
                self.drop_broken_port();
                Err(TransportError::ReceiveFailed(error_msg))
            },
            // Expected while waiting for a slow meter
            Err(_) => Err(TransportError::Timeout(format!(
                "Receive operation timed out after {receive_timeout:?}"
            ))),
        }
    }

    async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };

        let mut scratch = [0u8; 256];
        let deadline = Instant::now() + DRAIN_WINDOW;
        let mut discarded = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, port.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Ok(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(format!(
                        "Failed to drain input: {e}"
                    )))
                },
            }
        }

        if discarded > 0 {
            self.stats.record_discarded(discarded);
            debug!(discarded, "Discarded stale serial input");
        }
        Ok(discarded)
    }

    async fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn connection_state(&self) -> ConnectionState {
        self.stats.connection_state
    }

    async fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    async fn reset_stats(&mut self) {
        self.stats.reset();
    }

    async fn diagnostics(&self) -> HashMap<String, String> {
        let mut diag = HashMap::new();
        diag.insert("transport_type".to_string(), self.transport_type().to_string());
        diag.insert("port".to_string(), self.config.port.clone());
        diag.insert("baud_rate".to_string(), self.config.baud_rate.to_string());
        diag.insert("frame_format".to_string(), self.config.frame_format());
        diag.insert("connected".to_string(), self.port.is_some().to_string());
        diag.insert(
            "connection_state".to_string(),
            format!("{:?}", self.stats.connection_state),
        );
        diag
    }
}
