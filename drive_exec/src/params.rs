//! # Drive Executable Parameters
//!
//! Parameters loaded from `drive_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::calib::CalibParams;
use crate::tc_server::MIN_NUM_WORKERS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveExecParams {

    /// Drive strength used until the first speed request is recieved.
    pub default_drive_strength: u8,

    /// Number of server worker threads, at least 2.
    pub num_workers: usize,

    /// Frequency of the PWM on the H-bridge enable lines.
    ///
    /// Units: Hertz
    pub pwm_frequency_hz: f64,

    pub pins: HBridgePins,

    pub calib: CalibParams,
}

/// BCM GPIO numbers of the H-bridge inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HBridgePins {
    /// Left motor direction lines
    pub in1: u8,
    pub in2: u8,

    /// Right motor direction lines
    pub in3: u8,
    pub in4: u8,

    /// Left motor enable (PWM)
    pub ena: u8,

    /// Right motor enable (PWM)
    pub enb: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("At least {} workers are required, found {0}", MIN_NUM_WORKERS)]
    TooFewWorkers(usize),

    #[error("The PWM frequency must be positive, found {0} Hz")]
    InvalidPwmFrequency(f64),

    #[error("Pin {0} is assigned more than once")]
    DuplicatePin(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveExecParams {
    /// Check the parameters are usable.
    ///
    /// The calibration is checked separately when the converter is built.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_workers < MIN_NUM_WORKERS {
            return Err(ParamsError::TooFewWorkers(self.num_workers))
        }

        if !(self.pwm_frequency_hz.is_finite() && self.pwm_frequency_hz > 0.0) {
            return Err(ParamsError::InvalidPwmFrequency(self.pwm_frequency_hz))
        }

        let pins = self.pins.as_array();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                return Err(ParamsError::DuplicatePin(*pin))
            }
        }

        Ok(())
    }
}

impl Default for DriveExecParams {
    fn default() -> Self {
        Self {
            default_drive_strength: 200,
            num_workers: 4,
            pwm_frequency_hz: 1000.0,
            pins: HBridgePins::default(),
            calib: CalibParams::default(),
        }
    }
}

impl HBridgePins {
    pub fn as_array(&self) -> [u8; 6] {
        [self.in1, self.in2, self.in3, self.in4, self.ena, self.enb]
    }
}

impl Default for HBridgePins {
    fn default() -> Self {
        Self {
            in1: 17,
            in2: 27,
            in3: 5,
            in4: 6,
            ena: 12,
            enb: 13,
        }
    }
}
