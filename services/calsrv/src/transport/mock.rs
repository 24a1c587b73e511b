//! Mock Transport for Testing
//!
//! Stands in for a meter on the other end of the line. Frames written by the code
//! under test are recorded, and replies come either from a queue filled by the test
//! or from a responder closure that sees each sent frame.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::traits::{ConnectionState, Transport, TransportError, TransportStats};

/// Produces the reply chunks for one sent frame
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    pub name: String,
    /// Read deadline when the caller passes none
    pub read_timeout: Duration,
    pub should_fail_connection: bool,
    pub should_fail_send: bool,
    pub should_fail_receive: bool,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            name: "Mock Meter".to_string(),
            read_timeout: Duration::from_millis(100),
            should_fail_connection: false,
            should_fail_send: false,
            should_fail_receive: false,
        }
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    receive_queue: VecDeque<Vec<u8>>,
    sent_data: Vec<Vec<u8>>,
    responder: Option<Responder>,
    stats: TransportStats,
}

struct MockShared {
    state: Mutex<MockState>,
    data_ready: Notify,
}

/// Test-side view of a [`MockTransport`], usable after the transport has been moved
#[derive(Clone)]
pub struct MockTransportHandle {
    shared: Arc<MockShared>,
}

impl fmt::Debug for MockTransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MockTransportHandle")
            .field("connected", &state.connected)
            .field("queued", &state.receive_queue.len())
            .field("sent", &state.sent_data.len())
            .finish()
    }
}

impl MockTransportHandle {
    /// Queue bytes for the next read
    pub fn add_receive_data(&self, data: Vec<u8>) {
        self.shared.state.lock().receive_queue.push_back(data);
        self.shared.data_ready.notify_one();
    }

    /// Install a closure answering every sent frame
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.shared.state.lock().responder = Some(Arc::new(responder));
    }

    pub fn clear_responder(&self) {
        self.shared.state.lock().responder = None;
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().sent_data.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.shared.state.lock().sent_data.len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.state.lock().connected = connected;
    }
}

/// Mock transport implementation
pub struct MockTransport {
    config: MockTransportConfig,
    shared: Arc<MockShared>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new(config: MockTransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(MockShared {
                state: Mutex::new(MockState::default()),
                data_ready: Notify::new(),
            }),
        }
    }

    /// A mock that is already connected, as most tests want
    pub fn connected() -> Self {
        let transport = Self::new(MockTransportConfig::default());
        transport.shared.state.lock().connected = true;
        transport
    }

    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn pop_chunk(&self, buffer: &mut [u8]) -> Option<usize> {
        let mut state = self.shared.state.lock();
        let mut chunk = state.receive_queue.pop_front()?;
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.receive_queue.push_front(chunk.split_off(n));
        }
        state.stats.record_bytes_received(n);
        Some(n)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        state.stats.record_connection_attempt();
        if self.config.should_fail_connection {
            state.stats.record_failed_connection();
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }
        state.connected = true;
        state.stats.record_successful_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.connected {
            state.connected = false;
            state.stats.record_disconnection();
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let responder = {
            let mut state = self.shared.state.lock();
            if !state.connected {
                return Err(TransportError::SendFailed("Not connected".to_string()));
            }
            if self.config.should_fail_send {
                return Err(TransportError::SendFailed("Mock send failure".to_string()));
            }
            state.sent_data.push(data.to_vec());
            state.stats.record_bytes_sent(data.len());
            state.responder.clone()
        };

        if let Some(responder) = responder {
            let replies = responder(data);
            debug!(chunks = replies.len(), "Mock meter replying");
            for reply in replies {
                self.shared.state.lock().receive_queue.push_back(reply);
                self.shared.data_ready.notify_one();
            }
        }
        Ok(data.len())
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        {
            let state = self.shared.state.lock();
            if !state.connected {
                return Err(TransportError::ReceiveFailed("Not connected".to_string()));
            }
        }
        if self.config.should_fail_receive {
            return Err(TransportError::ReceiveFailed(
                "Mock receive failure".to_string(),
            ));
        }

        if let Some(n) = self.pop_chunk(buffer) {
            return Ok(n);
        }

        let wait = timeout.unwrap_or(self.config.read_timeout);
        if tokio::time::timeout(wait, self.shared.data_ready.notified())
            .await
            .is_err()
        {
            return Err(TransportError::Timeout(format!(
                "No mock data within {wait:?}"
            )));
        }
        Ok(self.pop_chunk(buffer).unwrap_or(0))
    }

    async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let mut state = self.shared.state.lock();
        let stale: usize = state.receive_queue.drain(..).map(|chunk| chunk.len()).sum();
        state.stats.record_discarded(stale);
        Ok(stale)
    }

    async fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    async fn connection_state(&self) -> ConnectionState {
        let state = self.shared.state.lock();
        if state.connected {
            ConnectionState::Connected
        } else {
            state.stats.connection_state
        }
    }

    async fn stats(&self) -> TransportStats {
        self.shared.state.lock().stats.clone()
    }

    async fn reset_stats(&mut self) {
        self.shared.state.lock().stats.reset();
    }
}
