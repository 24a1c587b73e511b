//! The five calibration operations

use dlt645::{DataIdentifier, ParameterCodec, ParameterKind, WireEncoding};

use super::{CalibrationParameters, CalibrationStep, CorrectionFormat};
use crate::error::Result;

/// Zero-current offset, run with no load applied
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentOffsetStep;

impl CalibrationStep for CurrentOffsetStep {
    fn step_id(&self) -> &'static str {
        "step1"
    }

    fn name(&self) -> &'static str {
        "Current offset calibration"
    }

    fn description(&self) -> &'static str {
        "Measure the current channel offset with no load applied"
    }

    fn data_identifier(&self) -> DataIdentifier {
        DataIdentifier::from_bytes([0x00, 0xF8, 0x15, 0x00])
    }

    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>> {
        Ok(ParameterCodec::encode(
            params.no_load_current_threshold,
            ParameterKind::Current,
        )?)
    }

    fn correction_format(&self) -> CorrectionFormat {
        CorrectionFormat::new(WireEncoding::I32, 10000.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VoltageCurrentGainStep;

impl CalibrationStep for VoltageCurrentGainStep {
    fn step_id(&self) -> &'static str {
        "step2"
    }

    fn name(&self) -> &'static str {
        "Voltage and current gain calibration"
    }

    fn description(&self) -> &'static str {
        "Calibrate RMS voltage and current gain at the standard operating point"
    }

    fn data_identifier(&self) -> DataIdentifier {
        DataIdentifier::from_bytes([0x00, 0xF8, 0x16, 0x00])
    }

    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>> {
        let mut bytes = ParameterCodec::encode(params.standard_voltage, ParameterKind::Voltage)?;
        bytes.extend(ParameterCodec::encode(
            params.standard_current,
            ParameterKind::Current,
        )?);
        Ok(bytes)
    }

    fn correction_format(&self) -> CorrectionFormat {
        CorrectionFormat::new(WireEncoding::U32, 10000.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerGainStep;

impl CalibrationStep for PowerGainStep {
    fn step_id(&self) -> &'static str {
        "step3"
    }

    fn name(&self) -> &'static str {
        "Power gain calibration"
    }

    fn description(&self) -> &'static str {
        "Calibrate active power gain against V * I * PF"
    }

    fn data_identifier(&self) -> DataIdentifier {
        DataIdentifier::from_bytes([0x00, 0xF8, 0x17, 0x00])
    }

    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>> {
        Ok(ParameterCodec::encode(
            params.active_power(),
            ParameterKind::Power,
        )?)
    }

    fn correction_format(&self) -> CorrectionFormat {
        CorrectionFormat::new(WireEncoding::U32, 10000.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseCompensationStep;

impl CalibrationStep for PhaseCompensationStep {
    fn step_id(&self) -> &'static str {
        "step4"
    }

    fn name(&self) -> &'static str {
        "Phase compensation calibration"
    }

    fn description(&self) -> &'static str {
        "Compensate the phase error between voltage and current channels"
    }

    fn data_identifier(&self) -> DataIdentifier {
        DataIdentifier::from_bytes([0x00, 0xF8, 0x18, 0x00])
    }

    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>> {
        Ok(ParameterCodec::encode(
            params.phase_angle,
            ParameterKind::Phase,
        )?)
    }

    fn correction_format(&self) -> CorrectionFormat {
        CorrectionFormat::new(WireEncoding::I16, 100.0, 0.0)
    }
}

/// Bias at the low end of the current range
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallCurrentBiasStep;

impl CalibrationStep for SmallCurrentBiasStep {
    fn step_id(&self) -> &'static str {
        "step5"
    }

    fn name(&self) -> &'static str {
        "Small current bias calibration"
    }

    fn description(&self) -> &'static str {
        "Correct the measurement bias at small load currents"
    }

    fn data_identifier(&self) -> DataIdentifier {
        DataIdentifier::from_bytes([0x00, 0xF8, 0x19, 0x00])
    }

    fn prepare_parameters(&self, params: &CalibrationParameters) -> Result<Vec<u8>> {
        Ok(ParameterCodec::encode(
            params.small_current_threshold,
            ParameterKind::Current,
        )?)
    }

    fn correction_format(&self) -> CorrectionFormat {
        CorrectionFormat::new(WireEncoding::U32, 10000.0, 0.0)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::CalSrvError;
    use dlt645::CodecError;

    #[test]
    fn test_current_offset_parameters() {
        let bytes = CurrentOffsetStep
            .prepare_parameters(&CalibrationParameters::default())
            .unwrap();
        // 0.001 A -> 1 mA
        assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_voltage_current_gain_parameters() {
        let bytes = VoltageCurrentGainStep
            .prepare_parameters(&CalibrationParameters::default())
            .unwrap();
        // 22000 (220.00 V) then 1000 (1.000 A)
        assert_eq!(bytes, vec![0xF0, 0x55, 0xE8, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_power_gain_parameters() {
        let params = CalibrationParameters {
            power_factor: 0.5,
            ..Default::default()
        };
        let bytes = PowerGainStep.prepare_parameters(&params).unwrap();
        // 110.00 W
        assert_eq!(bytes, 11000u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_phase_parameters_signed() {
        let params = CalibrationParameters {
            phase_angle: -60.0,
            ..Default::default()
        };
        let bytes = PhaseCompensationStep.prepare_parameters(&params).unwrap();
        assert_eq!(bytes, (-6000i16).to_le_bytes().to_vec());
    }

    #[test]
    fn test_out_of_range_parameter_rejected() {
        let params = CalibrationParameters {
            standard_voltage: 600.0,
            ..Default::default()
        };
        let err = VoltageCurrentGainStep.prepare_parameters(&params).unwrap_err();
        assert!(matches!(
            err,
            CalSrvError::Codec(CodecError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_neutral_values_on_acknowledgement() {
        let ack = [0x00, 0x16, 0xF8, 0x00];
        assert_eq!(CurrentOffsetStep.process_response(&ack).unwrap(), 0.0);
        assert_eq!(VoltageCurrentGainStep.process_response(&ack).unwrap(), 1.0);
        assert_eq!(PowerGainStep.process_response(&ack).unwrap(), 1.0);
        assert_eq!(PhaseCompensationStep.process_response(&ack).unwrap(), 0.0);
        assert_eq!(SmallCurrentBiasStep.process_response(&ack).unwrap(), 0.0);
    }

    #[test]
    fn test_small_current_bias_value() {
        let mut payload = vec![0x00, 0x19, 0xF8, 0x00];
        payload.extend_from_slice(&125u32.to_le_bytes());
        assert_eq!(
            SmallCurrentBiasStep.process_response(&payload).unwrap(),
            0.0125
        );
    }
}
