//! Scripted meter used by the integration tests
//!
//! The meter answers each request according to a per-identifier script. Unscripted
//! identifiers get a plain acknowledgement.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use calsrv::transport::{ConnectionState, Transport, TransportError, TransportStats};
use calsrv::{CommunicationConfig, Communicator};
use dlt645::frame::{apply_offset, checksum, remove_offset, END_MARKER, RESPONSE_FLAG, START_MARKER};
use dlt645::FrameParser;

/// How the meter answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo the identifier followed by these value bytes
    Value(Vec<u8>),
    /// Identifier only
    Ack,
    Silent,
    /// First half of a valid reply
    Truncated,
    /// Valid reply from another meter
    WrongAddress,
    /// Valid reply preceded by the wake-up preamble
    WithPreamble(Vec<u8>),
}

#[derive(Debug, Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<Reply>>,
    fallback: HashMap<String, Reply>,
    requests: Vec<Vec<u8>>,
}

/// Test-side handle for scripting the meter and inspecting requests
#[derive(Debug, Clone, Default)]
pub struct MeterScript {
    state: Arc<Mutex<ScriptState>>,
}

impl MeterScript {
    /// Answer the next request for `identifier` with `reply`
    pub fn push(&self, identifier: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .queued
            .entry(identifier.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer every request for `identifier` with `reply` once the queue is empty
    pub fn always(&self, identifier: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .fallback
            .insert(identifier.to_string(), reply);
        self
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self, identifier: &str) -> usize {
        self.requests()
            .iter()
            .filter(|frame| {
                FrameParser::parse(frame)
                    .data_identifier
                    .is_some_and(|di| di.to_string() == identifier)
            })
            .count()
    }

    fn reply_for(&self, request: &[u8]) -> Reply {
        let mut state = self.state.lock();
        state.requests.push(request.to_vec());
        let Some(identifier) = FrameParser::parse(request).data_identifier else {
            return Reply::Silent;
        };
        let key = identifier.to_string();
        if let Some(reply) = state.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            return reply;
        }
        state.fallback.get(&key).cloned().unwrap_or(Reply::Ack)
    }
}

fn reply_frame(address: &[u8], control: u8, plain_payload: &[u8]) -> Vec<u8> {
    let payload = apply_offset(plain_payload);
    let mut frame = vec![START_MARKER];
    frame.extend_from_slice(address);
    frame.push(START_MARKER);
    frame.push(control);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&payload);
    frame.push(checksum(&frame));
    frame.push(END_MARKER);
    frame
}

fn encode_reply(request: &[u8], reply: Reply) -> Vec<u8> {
    let address = &request[1..7];
    let control = request[8] | RESPONSE_FLAG;
    let mut plain = remove_offset(&request[10..14]);

    match reply {
        Reply::Silent => Vec::new(),
        Reply::Ack => reply_frame(address, control, &plain),
        Reply::Value(value) => {
            plain.extend_from_slice(&value);
            reply_frame(address, control, &plain)
        },
        Reply::Truncated => {
            let frame = reply_frame(address, control, &plain);
            frame[..frame.len() / 2].to_vec()
        },
        Reply::WrongAddress => reply_frame(&[0x22; 6], control, &plain),
        Reply::WithPreamble(value) => {
            plain.extend_from_slice(&value);
            let mut bytes = vec![0xFE, 0xFE, 0xFE, 0xFE];
            bytes.extend(reply_frame(address, control, &plain));
            bytes
        },
    }
}

/// Transport whose far end is a [`MeterScript`]
#[derive(Debug)]
pub struct ScriptedMeter {
    script: MeterScript,
    pending: VecDeque<u8>,
    /// Largest chunk handed out per read
    chunk_size: usize,
    connected: bool,
    stats: TransportStats,
}

impl ScriptedMeter {
    pub fn new(script: MeterScript) -> Self {
        Self {
            script,
            pending: VecDeque::new(),
            chunk_size: usize::MAX,
            connected: true,
            stats: TransportStats::new(),
        }
    }

    /// Deliver replies a few bytes at a time
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl Transport for ScriptedMeter {
    fn transport_type(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted meter"
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.stats.record_successful_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.stats.record_disconnection();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::SendFailed("Not connected".to_string()));
        }
        self.stats.record_bytes_sent(data.len());
        let reply = self.script.reply_for(data);
        self.pending.extend(encode_reply(data, reply));
        Ok(data.len())
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            let wait = timeout.unwrap_or(Duration::from_millis(100));
            tokio::time::sleep(wait).await;
            return Err(TransportError::Timeout(format!("meter silent for {wait:?}")));
        }

        let n = buffer.len().min(self.chunk_size).min(self.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        self.stats.record_bytes_received(n);
        Ok(n)
    }

    async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let stale = self.pending.len();
        self.pending.clear();
        Ok(stale)
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connection_state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    async fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

/// Short timeouts so silent-meter cases finish quickly
pub fn fast_communication() -> CommunicationConfig {
    CommunicationConfig {
        timeout_ms: 30,
        max_retries: 1,
        retry_delay_ms: 1,
        ..Default::default()
    }
}

pub fn communicator(meter: ScriptedMeter, config: CommunicationConfig) -> Arc<Communicator> {
    match Communicator::new(Box::new(meter), config) {
        Ok(communicator) => Arc::new(communicator),
        Err(e) => panic!("communicator rejected test config: {e}"),
    }
}
