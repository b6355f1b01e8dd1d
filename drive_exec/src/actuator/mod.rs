//! # Actuator Module
//!
//! This module provides a unified interface to the motor driver, so that the scheduler can drive
//! either the real H-bridge or a simulated one.
//!
//! The two DC motors are wired to an H-bridge with four direction lines (IN1/IN2 for the left
//! motor, IN3/IN4 for the right) and two enable lines which are driven with PWM to set the speed.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`Actuator`] implementation for an H-bridge wired to the Raspberry Pi GPIO header.
#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
pub mod hbridge;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use std::fmt;
use util::maths::{clamp, lin_map};

use crate::calib::MAX_DRIVE_STRENGTH;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing the motor driver.
pub trait Actuator: Send {

    /// Set the duty cycle of both motor channels.
    ///
    /// ## Arguments
    /// - `percent` - The duty cycle to set. Must be a value between 0.0 and 100.0. Values outside
    ///   this range will be rejected.
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError>;

    /// Set the direction lines to the pattern for the given motion.
    fn set_motion(&mut self, motion: Motion) -> Result<(), ActuatorError>;

    fn drive_forward(&mut self) -> Result<(), ActuatorError> {
        self.set_motion(Motion::Forward)
    }

    fn drive_backward(&mut self) -> Result<(), ActuatorError> {
        self.set_motion(Motion::Backward)
    }

    fn turn_left(&mut self) -> Result<(), ActuatorError> {
        self.set_motion(Motion::TurnLeft)
    }

    fn turn_right(&mut self) -> Result<(), ActuatorError> {
        self.set_motion(Motion::TurnRight)
    }

    /// Set all direction lines low.
    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.set_motion(Motion::Stop)
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Actuator which doesn't drive any hardware, only logging the commands it recieves.
///
/// Used when running away from the vehicle.
#[derive(Debug)]
pub struct SimActuator {
    motion: Motion,
    duty_percent: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Motions the H-bridge direction lines can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stop,
}

#[derive(thiserror::Error, Debug)]
pub enum ActuatorError {
    #[error("A GPIO error occured: {0}")]
    Gpio(String),

    #[error("Duty cycle must be between 0.0 and 100.0, found {0}")]
    InvalidDutyCycle(f64)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Motion {
    /// Levels of the (IN1, IN2, IN3, IN4) direction lines for this motion.
    pub fn line_levels(&self) -> [bool; 4] {
        match self {
            Motion::Forward   => [false, true, false, true],
            Motion::Backward  => [true, false, true, false],
            Motion::TurnLeft  => [false, true, true, false],
            Motion::TurnRight => [true, false, false, true],
            Motion::Stop      => [false, false, false, false],
        }
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Motion::Forward => "forward",
            Motion::Backward => "backward",
            Motion::TurnLeft => "turn left",
            Motion::TurnRight => "turn right",
            Motion::Stop => "stop",
        };
        f.write_str(s)
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        (**self).set_duty_cycle(percent)
    }

    fn set_motion(&mut self, motion: Motion) -> Result<(), ActuatorError> {
        (**self).set_motion(motion)
    }
}

impl SimActuator {
    pub fn new() -> Self {
        Self {
            motion: Motion::Stop,
            duty_percent: 0.0,
        }
    }
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimActuator {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        self.duty_percent = check_duty_cycle(percent)?;
        debug!("[sim] duty cycle {:.1} % ({})", self.duty_percent, self.motion);
        Ok(())
    }

    fn set_motion(&mut self, motion: Motion) -> Result<(), ActuatorError> {
        self.motion = motion;
        debug!("[sim] lines {:?} ({})", motion.line_levels(), motion);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a drive strength into the duty cycle percentage to command.
pub fn duty_percent(drive_strength: u8) -> f64 {
    clamp(
        lin_map((0.0, MAX_DRIVE_STRENGTH as f64), (0.0, 100.0), drive_strength as f64),
        0.0,
        100.0
    )
}

/// Check the duty cycle is in `[0, 100]`, returning it if so.
pub fn check_duty_cycle(percent: f64) -> Result<f64, ActuatorError> {
    if (0.0..=100.0).contains(&percent) {
        Ok(percent)
    }
    else {
        Err(ActuatorError::InvalidDutyCycle(percent))
    }
}

// ------------------------------------------------------------------------------------------------
// MOCK
// ------------------------------------------------------------------------------------------------

/// Recording actuator for tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A command recieved by the mock.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Cmd {
        Duty(f64),
        Motion(Motion),
    }

    /// Records every command it is sent into a shared log, which stays accessible after the mock
    /// has been moved into a scheduler.
    pub struct MockActuator {
        log: Arc<Mutex<Vec<Cmd>>>,

        /// If set, commands for this motion fail.
        pub fail_on: Option<Motion>,

        /// If set, every duty cycle command fails.
        pub fail_duty: bool,
    }

    impl MockActuator {
        pub fn new() -> (Self, Arc<Mutex<Vec<Cmd>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            (Self { log: log.clone(), fail_on: None, fail_duty: false }, log)
        }
    }

    impl Actuator for MockActuator {
        fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
            check_duty_cycle(percent)?;
            if self.fail_duty {
                return Err(ActuatorError::Gpio(String::from("mock duty cycle failure")))
            }
            self.log.lock().unwrap().push(Cmd::Duty(percent));
            Ok(())
        }

        fn set_motion(&mut self, motion: Motion) -> Result<(), ActuatorError> {
            if self.fail_on == Some(motion) {
                return Err(ActuatorError::Gpio(format!("mock failure on {}", motion)))
            }
            self.log.lock().unwrap().push(Cmd::Motion(motion));
            Ok(())
        }
    }
}
