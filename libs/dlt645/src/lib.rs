//! DL/T645 calibration codec
//!
//! Wire-level encoding for the meter calibration command set:
//! - `frame`: frame building, parsing, identifier permutation, payload offset and checksum
//! - `parameter`: fixed-point encoding of physical quantities with range and precision checks
//!
//! The crate is synchronous and does no I/O.

pub mod error;
pub mod frame;
pub mod parameter;

pub use error::{CodecError, Result};
pub use frame::{
    compare_frames, scan_frame, DataIdentifier, DeviceAddress, FrameBuilder, FrameComparison,
    FrameParseResult, FrameParser, FrameScan, ParsedFrame, DEFAULT_CONTROL_CODE, RESPONSE_FLAG,
};
pub use parameter::{
    error_percentage, CalibrationQuantities, ParameterCheck, ParameterCodec, ParameterKind,
    ParameterReport, ParameterSpec, WireEncoding,
};
