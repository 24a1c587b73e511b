//! DL/T645 calibration frame codec
//!
//! Frame layout:
//!
//! ```text
//! 68 | address (6) | 68 | control | length | payload (length) | checksum | 16
//! ```
//!
//! A calibration command payload is `identifier(4) | parameters | password(4) | operator(4) | trailer(1)`
//! with every byte shifted by `+0x33` before transmission. The identifier is stored on the wire in
//! permuted byte order. The checksum is the 8-bit wrapping sum of every byte before it, starting
//! at the first start marker.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{CodecError, Result};

/// Frame start marker (appears twice)
pub const START_MARKER: u8 = 0x68;
/// Frame end marker
pub const END_MARKER: u8 = 0x16;
/// Control code for calibration write commands
pub const DEFAULT_CONTROL_CODE: u8 = 0x14;
/// Bit set by the meter in the control code of a response
pub const RESPONSE_FLAG: u8 = 0x80;
/// Constant added to every payload byte on the wire
pub const PAYLOAD_OFFSET: u8 = 0x33;
/// Smallest structurally valid frame (empty payload)
pub const MIN_FRAME_LEN: usize = 12;

/// Bytes before the payload: start, address, start, control, length
const HEADER_LEN: usize = 10;
/// Checksum and end marker
const TRAILER_LEN: usize = 2;

const PASSWORD: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const OPERATOR: [u8; 4] = [0x01, 0x00, 0x00, 0x00];
const PAYLOAD_TRAILER: u8 = 0x00;
/// password + operator + trailer
const CREDENTIALS_LEN: usize = 9;

/// Wire slot `i` carries natural identifier byte `IDENTIFIER_SLOTS[i]`.
///
/// For `00F81500` the natural bytes are `00 F8 15 00` and the wire order is `00 15 F8 00`.
const IDENTIFIER_SLOTS: [usize; 4] = [3, 2, 1, 0];

/// Reorder natural identifier bytes into wire order.
pub fn permute_identifier(natural: [u8; 4]) -> [u8; 4] {
    let mut wire = [0u8; 4];
    for (slot, &index) in IDENTIFIER_SLOTS.iter().enumerate() {
        wire[slot] = natural[index];
    }
    wire
}

/// Inverse of [`permute_identifier`].
pub fn restore_identifier(wire: [u8; 4]) -> [u8; 4] {
    let mut natural = [0u8; 4];
    for (slot, &index) in IDENTIFIER_SLOTS.iter().enumerate() {
        natural[index] = wire[slot];
    }
    natural
}

/// Add the wire offset to every byte (mod 256).
pub fn apply_offset(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b.wrapping_add(PAYLOAD_OFFSET)).collect()
}

/// Remove the wire offset from every byte (mod 256).
pub fn remove_offset(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b.wrapping_sub(PAYLOAD_OFFSET)).collect()
}

/// 8-bit wrapping sum.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn serialize_hex<T, S>(bytes: T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&hex::encode_upper(bytes.as_ref()))
}

/// Four-byte calibration data identifier, kept in natural (textual) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataIdentifier([u8; 4]);

impl DataIdentifier {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn from_wire_bytes(wire: [u8; 4]) -> Self {
        Self(restore_identifier(wire))
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }

    pub fn wire_bytes(&self) -> [u8; 4] {
        permute_identifier(self.0)
    }
}

impl FromStr for DataIdentifier {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 8 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidIdentifier(s.to_string()));
        }
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| CodecError::InvalidIdentifier(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for DataIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl Serialize for DataIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Meter address in wire order.
///
/// The textual form is the printed meter number; its bytes are reversed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn from_wire_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn wire_bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self([0x11; 6])
    }
}

impl FromStr for DeviceAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 12 {
            return Err(CodecError::InvalidAddress(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CodecError::InvalidAddress(s.to_string()))?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printed = self.0;
        printed.reverse();
        write!(f, "{}", hex::encode_upper(printed))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Builds calibration command frames.
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    address: DeviceAddress,
    control_code: Option<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: DeviceAddress) -> Self {
        self.address = address;
        self
    }

    pub fn with_control_code(mut self, control_code: u8) -> Self {
        self.control_code = Some(control_code);
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn control_code(&self) -> u8 {
        self.control_code.unwrap_or(DEFAULT_CONTROL_CODE)
    }

    /// Build a frame from a textual identifier such as `00F81500`.
    ///
    /// # Arguments
    ///
    /// * `data_identifier` - 8 hex characters
    /// * `parameter_bytes` - already encoded parameter values, may be empty
    pub fn build(&self, data_identifier: &str, parameter_bytes: &[u8]) -> Result<Vec<u8>> {
        let identifier = data_identifier.parse::<DataIdentifier>()?;
        self.build_with(identifier, parameter_bytes)
    }

    /// Build a frame from a parsed identifier.
    pub fn build_with(&self, identifier: DataIdentifier, parameter_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut plain = Vec::with_capacity(4 + parameter_bytes.len() + CREDENTIALS_LEN);
        plain.extend_from_slice(&identifier.wire_bytes());
        plain.extend_from_slice(parameter_bytes);
        plain.extend_from_slice(&PASSWORD);
        plain.extend_from_slice(&OPERATOR);
        plain.push(PAYLOAD_TRAILER);

        let length = u8::try_from(plain.len()).map_err(|_| CodecError::PayloadTooLong(plain.len()))?;
        let payload = apply_offset(&plain);

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
        frame.push(START_MARKER);
        frame.extend_from_slice(&self.address.wire_bytes());
        frame.push(START_MARKER);
        frame.push(self.control_code());
        frame.push(length);
        frame.extend_from_slice(&payload);
        frame.push(checksum(&frame));
        frame.push(END_MARKER);

        Ok(frame)
    }

    /// Resolve a password/operator literal as written in calibration sheets.
    ///
    /// Only the two literals observed on real meters are known: `33333333` (password)
    /// and `34333333` (operator). They are given in wire form and returned without offset.
    pub fn field_from_literal(literal: &str) -> Result<[u8; 4]> {
        match literal.to_ascii_uppercase().as_str() {
            "33333333" => Ok(PASSWORD),
            "34333333" => Ok(OPERATOR),
            _ => Err(CodecError::UnsupportedField(literal.to_string())),
        }
    }
}

/// Outcome of parsing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameParseResult {
    Success,
    InvalidFormat,
    ChecksumError,
    LengthError,
    UnknownError,
}

/// Decoded view of a received frame. Fields are filled as far as parsing got.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFrame {
    pub result: FrameParseResult,
    pub error_message: Option<String>,
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    pub address: Option<DeviceAddress>,
    pub control_code: Option<u8>,
    pub data_length: Option<u8>,
    /// Payload as on the wire (offset applied)
    #[serde(serialize_with = "serialize_hex")]
    pub data_field: Vec<u8>,
    pub checksum: Option<u8>,
    pub calculated_checksum: Option<u8>,
    pub checksum_valid: bool,
    pub data_identifier: Option<DataIdentifier>,
    /// Residual bytes after the identifier, offset removed
    #[serde(serialize_with = "serialize_hex")]
    pub parameter_data: Vec<u8>,
    pub password: Option<[u8; 4]>,
    pub operator: Option<[u8; 4]>,
}

impl ParsedFrame {
    fn new(raw: &[u8]) -> Self {
        Self {
            result: FrameParseResult::UnknownError,
            error_message: None,
            raw: raw.to_vec(),
            address: None,
            control_code: None,
            data_length: None,
            data_field: Vec::new(),
            checksum: None,
            calculated_checksum: None,
            checksum_valid: false,
            data_identifier: None,
            parameter_data: Vec::new(),
            password: None,
            operator: None,
        }
    }

    fn fail(mut self, result: FrameParseResult, message: String) -> Self {
        self.result = result;
        self.error_message = Some(message);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == FrameParseResult::Success
    }

    pub fn is_response(&self) -> bool {
        self.control_code.is_some_and(|c| c & RESPONSE_FLAG != 0)
    }

    /// Data field with the wire offset removed.
    pub fn payload(&self) -> Vec<u8> {
        remove_offset(&self.data_field)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn decode_data_field(&mut self) {
        if self.data_field.len() < 4 {
            return;
        }
        let plain = remove_offset(&self.data_field);
        let (identifier, rest) = plain.split_at(4);
        self.data_identifier = Some(DataIdentifier::from_wire_bytes([
            identifier[0],
            identifier[1],
            identifier[2],
            identifier[3],
        ]));

        if rest.len() >= CREDENTIALS_LEN {
            // Command layout: parameters | password | operator | trailer
            let split = rest.len() - CREDENTIALS_LEN;
            self.parameter_data = rest[..split].to_vec();
            self.password = Some([rest[split], rest[split + 1], rest[split + 2], rest[split + 3]]);
            self.operator = Some([rest[split + 4], rest[split + 5], rest[split + 6], rest[split + 7]]);
        } else {
            self.parameter_data = rest.to_vec();
        }
    }
}

/// Parses and validates received frames. Parsing never fails; problems are
/// reported in [`ParsedFrame::result`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameParser;

impl FrameParser {
    pub fn parse(frame: &[u8]) -> ParsedFrame {
        let mut parsed = ParsedFrame::new(frame);

        if frame.len() < MIN_FRAME_LEN {
            let message = format!("Frame too short: {} bytes (min {MIN_FRAME_LEN})", frame.len());
            return parsed.fail(FrameParseResult::LengthError, message);
        }
        if frame[0] != START_MARKER {
            let message = format!("Invalid start marker: 0x{:02X}", frame[0]);
            return parsed.fail(FrameParseResult::InvalidFormat, message);
        }
        if frame[7] != START_MARKER {
            let message = format!("Invalid second start marker: 0x{:02X}", frame[7]);
            return parsed.fail(FrameParseResult::InvalidFormat, message);
        }

        let mut address = [0u8; 6];
        address.copy_from_slice(&frame[1..7]);
        parsed.address = Some(DeviceAddress::from_wire_bytes(address));
        parsed.control_code = Some(frame[8]);
        let length = frame[9];
        parsed.data_length = Some(length);

        let expected = HEADER_LEN + usize::from(length) + TRAILER_LEN;
        if frame.len() != expected {
            let message = format!(
                "Length mismatch: declared {length} payload bytes, frame is {} bytes (expected {expected})",
                frame.len()
            );
            return parsed.fail(FrameParseResult::LengthError, message);
        }

        let checksum_pos = frame.len() - TRAILER_LEN;
        parsed.data_field = frame[HEADER_LEN..checksum_pos].to_vec();
        parsed.checksum = Some(frame[checksum_pos]);
        let calculated = checksum(&frame[..checksum_pos]);
        parsed.calculated_checksum = Some(calculated);
        parsed.checksum_valid = calculated == frame[checksum_pos];
        parsed.decode_data_field();

        let end = frame[frame.len() - 1];
        if end != END_MARKER {
            let message = format!("Invalid end marker: 0x{end:02X}");
            return parsed.fail(FrameParseResult::InvalidFormat, message);
        }
        if !parsed.checksum_valid {
            let message = format!(
                "Checksum mismatch: frame 0x{:02X}, calculated 0x{calculated:02X}",
                frame[checksum_pos]
            );
            return parsed.fail(FrameParseResult::ChecksumError, message);
        }

        parsed.result = FrameParseResult::Success;
        parsed
    }

    /// Parse a hex string; whitespace between bytes is ignored.
    pub fn parse_hex(text: &str) -> ParsedFrame {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        match hex::decode(&compact) {
            Ok(bytes) => Self::parse(&bytes),
            Err(e) => ParsedFrame::new(&[])
                .fail(FrameParseResult::InvalidFormat, format!("Invalid hex string: {e}")),
        }
    }
}

/// Result of matching a response frame against the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameComparison {
    pub address_match: bool,
    pub expected_control: Option<u8>,
    pub actual_control: Option<u8>,
    pub control_match: bool,
    /// `None` when the response carries no identifier
    pub identifier_match: Option<bool>,
}

impl FrameComparison {
    /// Address and response control code both line up.
    pub fn matches(&self) -> bool {
        self.address_match && self.control_match
    }
}

pub fn compare_frames(request: &ParsedFrame, response: &ParsedFrame) -> FrameComparison {
    let expected_control = request.control_code.map(|c| c | RESPONSE_FLAG);
    let identifier_match = match (request.data_identifier, response.data_identifier) {
        (Some(sent), Some(received)) => Some(sent == received),
        _ => None,
    };

    FrameComparison {
        address_match: request.address.is_some() && request.address == response.address,
        expected_control,
        actual_control: response.control_code,
        control_match: expected_control.is_some() && expected_control == response.control_code,
        identifier_match,
    }
}

/// State of a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScan {
    Empty,
    /// Bytes present but no complete frame yet
    Partial,
    /// `buffer[start..end]` is a structurally complete frame
    Complete { start: usize, end: usize },
}

/// Locate the first structurally complete frame in `buffer`.
///
/// Bytes before a start marker (e.g. the `FE` wake-up preamble) are skipped. Only the
/// markers and declared length are checked; content validation is left to [`FrameParser`].
///
/// A start marker whose declared length runs past the buffer does not hide a later
/// frame. A frame found after such a candidate must also carry a valid checksum.
pub fn scan_frame(buffer: &[u8]) -> FrameScan {
    if buffer.is_empty() {
        return FrameScan::Empty;
    }

    let mut waiting = false;
    let mut from = 0;
    while let Some(offset) = buffer[from..].iter().position(|&b| b == START_MARKER) {
        let start = from + offset;
        let candidate = &buffer[start..];
        if candidate.len() < MIN_FRAME_LEN {
            // Later markers leave even fewer bytes
            break;
        }
        if candidate[7] == START_MARKER {
            let total = HEADER_LEN + usize::from(candidate[9]) + TRAILER_LEN;
            if candidate.len() < total {
                waiting = true;
            } else if candidate[total - 1] == END_MARKER
                && (!waiting || candidate[total - 2] == checksum(&candidate[..total - 2]))
            {
                return FrameScan::Complete {
                    start,
                    end: start + total,
                };
            }
        }
        from = start + 1;
    }

    FrameScan::Partial
}
