//! Fixed-point parameter codec
//!
//! Physical quantities travel as little-endian scaled integers. Each kind has an
//! accepted range and a maximum number of decimals; values are validated before
//! they are scaled so that a bad reading never reaches the meter.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Integer representation on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    U16,
    I16,
    U32,
    I32,
}

impl WireEncoding {
    pub const fn width(self) -> usize {
        match self {
            WireEncoding::U16 | WireEncoding::I16 => 2,
            WireEncoding::U32 | WireEncoding::I32 => 4,
        }
    }

    pub const fn signed(self) -> bool {
        matches!(self, WireEncoding::I16 | WireEncoding::I32)
    }

    /// Read a little-endian integer from the start of `bytes`.
    /// Returns `None` when fewer than [`width`](Self::width) bytes are available.
    pub fn read(self, bytes: &[u8]) -> Option<f64> {
        let raw = match self {
            WireEncoding::U16 => f64::from(u16::from_le_bytes(bytes.get(..2)?.try_into().ok()?)),
            WireEncoding::I16 => f64::from(i16::from_le_bytes(bytes.get(..2)?.try_into().ok()?)),
            WireEncoding::U32 => f64::from(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)),
            WireEncoding::I32 => f64::from(i32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)),
        };
        Some(raw)
    }
}

/// Range, precision and wire layout of one parameter kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub min: f64,
    pub max: f64,
    pub decimals: u32,
    pub unit: &'static str,
    pub scale: f64,
    pub encoding: WireEncoding,
}

impl ParameterSpec {
    pub const fn width(&self) -> usize {
        self.encoding.width()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Voltage,
    Current,
    Power,
    Frequency,
    Phase,
    Energy,
}

impl ParameterKind {
    pub const ALL: [ParameterKind; 6] = [
        ParameterKind::Voltage,
        ParameterKind::Current,
        ParameterKind::Power,
        ParameterKind::Frequency,
        ParameterKind::Phase,
        ParameterKind::Energy,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ParameterKind::Voltage => "voltage",
            ParameterKind::Current => "current",
            ParameterKind::Power => "power",
            ParameterKind::Frequency => "frequency",
            ParameterKind::Phase => "phase",
            ParameterKind::Energy => "energy",
        }
    }

    pub const fn spec(self) -> ParameterSpec {
        match self {
            ParameterKind::Voltage => ParameterSpec {
                min: 50.0,
                max: 500.0,
                decimals: 2,
                unit: "V",
                scale: 100.0,
                encoding: WireEncoding::U16,
            },
            ParameterKind::Current => ParameterSpec {
                min: 0.001,
                max: 200.0,
                decimals: 3,
                unit: "A",
                scale: 1000.0,
                encoding: WireEncoding::U32,
            },
            ParameterKind::Power => ParameterSpec {
                min: 0.01,
                max: 100_000.0,
                decimals: 2,
                unit: "W",
                scale: 100.0,
                encoding: WireEncoding::U32,
            },
            ParameterKind::Frequency => ParameterSpec {
                min: 45.0,
                max: 65.0,
                decimals: 2,
                unit: "Hz",
                scale: 100.0,
                encoding: WireEncoding::U16,
            },
            ParameterKind::Phase => ParameterSpec {
                min: -180.0,
                max: 180.0,
                decimals: 2,
                unit: "°",
                scale: 100.0,
                encoding: WireEncoding::I16,
            },
            ParameterKind::Energy => ParameterSpec {
                min: 0.0,
                max: 999_999.999,
                decimals: 3,
                unit: "kWh",
                scale: 1000.0,
                encoding: WireEncoding::U32,
            },
        }
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Stateless encoder/decoder for parameter values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterCodec;

impl ParameterCodec {
    /// Check range and precision without encoding.
    pub fn validate(value: f64, kind: ParameterKind) -> Result<()> {
        let spec = kind.spec();
        if !value.is_finite() {
            return Err(CodecError::InvalidValue { kind: kind.name() });
        }
        if value < spec.min || value > spec.max {
            return Err(CodecError::OutOfRange {
                kind: kind.name(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        let tolerance = 10f64.powi(-(spec.decimals as i32) - 1);
        if (value - round_to(value, spec.decimals)).abs() > tolerance {
            return Err(CodecError::PrecisionExceeded {
                kind: kind.name(),
                value,
                decimals: spec.decimals,
            });
        }
        Ok(())
    }

    /// Validate, scale and pack `value` little-endian.
    pub fn encode(value: f64, kind: ParameterKind) -> Result<Vec<u8>> {
        Self::validate(value, kind)?;
        let spec = kind.spec();
        let scaled = (value * spec.scale).round() as i64;
        let overflow = || CodecError::EncodedOverflow {
            kind: kind.name(),
            value,
            width: spec.width(),
        };

        let bytes = match spec.encoding {
            WireEncoding::U16 => u16::try_from(scaled).map_err(|_| overflow())?.to_le_bytes().to_vec(),
            WireEncoding::I16 => i16::try_from(scaled).map_err(|_| overflow())?.to_le_bytes().to_vec(),
            WireEncoding::U32 => u32::try_from(scaled).map_err(|_| overflow())?.to_le_bytes().to_vec(),
            WireEncoding::I32 => i32::try_from(scaled).map_err(|_| overflow())?.to_le_bytes().to_vec(),
        };
        Ok(bytes)
    }

    /// Unpack a little-endian scaled value back into physical units.
    pub fn decode(bytes: &[u8], kind: ParameterKind) -> Result<f64> {
        let spec = kind.spec();
        let raw = spec
            .encoding
            .read(bytes)
            .filter(|_| bytes.len() == spec.width())
            .ok_or(CodecError::LengthMismatch {
                kind: kind.name(),
                expected: spec.width(),
                actual: bytes.len(),
            })?;
        Ok(raw / spec.scale)
    }

    /// Validate a full set of test-bench quantities, including the derived active power.
    pub fn validate_quantities(quantities: &CalibrationQuantities) -> ParameterReport {
        let power = round_to(
            quantities.voltage * quantities.current * quantities.power_factor,
            ParameterKind::Power.spec().decimals,
        );
        let checks = [
            ("voltage", quantities.voltage, ParameterKind::Voltage),
            ("current", quantities.current, ParameterKind::Current),
            ("frequency", quantities.frequency, ParameterKind::Frequency),
            ("phase_angle", quantities.phase_angle, ParameterKind::Phase),
            ("power", power, ParameterKind::Power),
        ]
        .into_iter()
        .map(|(name, value, kind)| ParameterCheck {
            name,
            kind,
            value,
            error: Self::validate(value, kind).err().map(|e| e.to_string()),
        })
        .collect();

        ParameterReport { checks }
    }
}

/// Relative error of `measured` against `standard`, in percent, rounded to 3 decimals.
///
/// A zero standard yields 0 for a zero measurement and infinity otherwise.
pub fn error_percentage(measured: f64, standard: f64) -> f64 {
    if standard == 0.0 {
        return if measured == 0.0 { 0.0 } else { f64::INFINITY };
    }
    round_to((measured - standard) / standard * 100.0, 3)
}

/// Source values for a combined parameter check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationQuantities {
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
    pub phase_angle: f64,
    pub power_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterCheck {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub value: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterReport {
    pub checks: Vec<ParameterCheck>,
}

impl ParameterReport {
    pub fn is_valid(&self) -> bool {
        self.checks.iter().all(|c| c.error.is_none())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ParameterCheck> {
        self.checks.iter().filter(|c| c.error.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_voltage_round_trip() {
        let encoded = ParameterCodec::encode(220.0, ParameterKind::Voltage).unwrap();
        assert_eq!(encoded, vec![0xF0, 0x55]);
        assert_eq!(ParameterCodec::decode(&encoded, ParameterKind::Voltage).unwrap(), 220.0);
    }

    #[test]
    fn test_encoded_widths() {
        assert_eq!(ParameterCodec::encode(1.0, ParameterKind::Current).unwrap(), vec![0xE8, 0x03, 0x00, 0x00]);
        assert_eq!(ParameterCodec::encode(50.0, ParameterKind::Frequency).unwrap(), vec![0x88, 0x13]);
        assert_eq!(ParameterCodec::encode(220.0, ParameterKind::Power).unwrap(), 22000u32.to_le_bytes().to_vec());
        assert_eq!(ParameterCodec::encode(1234.567, ParameterKind::Energy).unwrap(), 1_234_567u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_signed_phase() {
        let encoded = ParameterCodec::encode(-60.5, ParameterKind::Phase).unwrap();
        assert_eq!(encoded, (-6050i16).to_le_bytes().to_vec());
        assert_eq!(ParameterCodec::decode(&encoded, ParameterKind::Phase).unwrap(), -60.5);

        let encoded = ParameterCodec::encode(-180.0, ParameterKind::Phase).unwrap();
        assert_eq!(ParameterCodec::decode(&encoded, ParameterKind::Phase).unwrap(), -180.0);
    }

    #[test]
    fn test_range_boundaries() {
        assert!(ParameterCodec::encode(50.0, ParameterKind::Voltage).is_ok());
        assert!(ParameterCodec::encode(500.0, ParameterKind::Voltage).is_ok());
        assert!(matches!(
            ParameterCodec::encode(49.99, ParameterKind::Voltage),
            Err(CodecError::OutOfRange { .. })
        ));
        assert!(matches!(
            ParameterCodec::encode(500.01, ParameterKind::Voltage),
            Err(CodecError::OutOfRange { .. })
        ));
        assert!(matches!(
            ParameterCodec::encode(0.0, ParameterKind::Current),
            Err(CodecError::OutOfRange { .. })
        ));
        assert!(matches!(
            ParameterCodec::encode(180.01, ParameterKind::Phase),
            Err(CodecError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_precision_exceeded() {
        assert!(matches!(
            ParameterCodec::encode(220.123, ParameterKind::Voltage),
            Err(CodecError::PrecisionExceeded { decimals: 2, .. })
        ));
        assert!(matches!(
            ParameterCodec::encode(1.0005, ParameterKind::Current),
            Err(CodecError::PrecisionExceeded { decimals: 3, .. })
        ));
        // Float noise below the tolerance is accepted
        assert!(ParameterCodec::encode(0.1 + 0.2, ParameterKind::Current).is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            ParameterCodec::encode(f64::NAN, ParameterKind::Voltage),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            ParameterCodec::encode(f64::INFINITY, ParameterKind::Power),
            Err(CodecError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_wire_read_takes_leading_bytes() {
        let bytes = [0xFE, 0xFF, 0xFF, 0xFF, 0xAA];
        assert_eq!(WireEncoding::U16.read(&bytes), Some(65534.0));
        assert_eq!(WireEncoding::I16.read(&bytes), Some(-2.0));
        assert_eq!(WireEncoding::U32.read(&bytes), Some(4_294_967_294.0));
        assert_eq!(WireEncoding::I32.read(&bytes), Some(-2.0));
        assert_eq!(WireEncoding::U32.read(&bytes[..3]), None);
        assert_eq!(WireEncoding::I16.read(&[]), None);
    }

    #[test]
    fn test_decode_length_mismatch() {
        let err = ParameterCodec::decode(&[0x01, 0x02, 0x03], ParameterKind::Current).unwrap_err();
        assert_eq!(
            err,
            CodecError::LengthMismatch {
                kind: "current",
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_validate_quantities() {
        let report = ParameterCodec::validate_quantities(&CalibrationQuantities {
            voltage: 220.0,
            current: 5.0,
            frequency: 50.0,
            phase_angle: 0.0,
            power_factor: 1.0,
        });
        assert!(report.is_valid());
        assert_eq!(report.checks.len(), 5);

        let report = ParameterCodec::validate_quantities(&CalibrationQuantities {
            voltage: 600.0,
            current: 5.0,
            frequency: 70.0,
            phase_angle: 0.0,
            power_factor: 1.0,
        });
        assert!(!report.is_valid());
        let failed: Vec<_> = report.errors().map(|c| c.name).collect();
        assert_eq!(failed, vec!["voltage", "frequency"]);
    }

    #[test]
    fn test_error_percentage() {
        assert_eq!(error_percentage(220.22, 220.0), 0.1);
        assert_eq!(error_percentage(99.0, 100.0), -1.0);
        assert_eq!(error_percentage(0.0, 0.0), 0.0);
        assert!(error_percentage(1.0, 0.0).is_infinite());
    }
}
