//! Transport Layer Traits
//!
//! The byte channel a meter is reached through. The calibration core only needs a
//! connected duplex stream with bounded reads; port discovery and OS handle details
//! stay behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// No bytes arrived before the read deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Byte and link counters of one transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Stale input dropped before a request went out
    pub bytes_discarded: u64,
    pub frames_sent: u64,
    pub connection_attempts: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub connection_state: ConnectionState,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
        self.connection_state = ConnectionState::Connecting;
    }

    pub fn record_successful_connection(&mut self) {
        self.connected_since = Some(Utc::now());
        self.connection_state = ConnectionState::Connected;
    }

    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
        self.connected_since = None;
        self.connection_state = ConnectionState::Error;
    }

    pub fn record_disconnection(&mut self) {
        self.disconnections += 1;
        self.connected_since = None;
        self.connection_state = ConnectionState::Disconnected;
    }

    /// One request frame written
    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    pub fn record_discarded(&mut self, bytes: usize) {
        self.bytes_discarded += bytes as u64;
    }

    /// Zero the counters; link state and `connected_since` survive
    pub fn reset(&mut self) {
        *self = Self {
            connected_since: self.connected_since,
            connection_state: self.connection_state,
            ..Self::default()
        };
    }
}

/// Settings a transport validates before opening its port
pub trait TransportConfig: Send + Sync + fmt::Debug + Clone {
    fn name(&self) -> &str;

    fn validate(&self) -> std::result::Result<(), TransportError>;

    /// Default read deadline when the caller passes none
    fn read_timeout(&self) -> Duration;
}

/// Duplex byte channel to a meter
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Short kind tag, e.g. `serial`
    fn transport_type(&self) -> &str;

    /// Port or device the transport talks to
    fn name(&self) -> &str;

    async fn connect(&mut self) -> std::result::Result<(), TransportError>;

    async fn disconnect(&mut self) -> std::result::Result<(), TransportError>;

    /// Write one complete request frame, returning the bytes written
    async fn send(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError>;

    /// Read whatever bytes are available, waiting at most `timeout`
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer to store received data
    /// * `timeout` - Read deadline, transport default when `None`
    ///
    /// # Returns
    ///
    /// `Ok(n)` bytes read, or `Err(TransportError::Timeout)` when nothing arrived in
    /// time. A frame may be split across several reads; `Ok(0)` counts as no data.
    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> std::result::Result<usize, TransportError>;

    /// Drop stale input left over from earlier exchanges, returning the bytes discarded
    async fn discard_input(&mut self) -> std::result::Result<usize, TransportError> {
        Ok(0)
    }

    async fn is_connected(&self) -> bool;

    async fn connection_state(&self) -> ConnectionState;

    async fn stats(&self) -> TransportStats;

    async fn reset_stats(&mut self);

    /// Key-value pairs of diagnostic information
    async fn diagnostics(&self) -> HashMap<String, String> {
        let mut diag = HashMap::new();
        diag.insert(
            "transport_type".to_string(),
            self.transport_type().to_string(),
        );
        diag.insert("name".to_string(), self.name().to_string());
        diag.insert(
            "connected".to_string(),
            self.is_connected().await.to_string(),
        );
        diag.insert(
            "connection_state".to_string(),
            format!("{:?}", self.connection_state().await),
        );
        diag
    }
}
