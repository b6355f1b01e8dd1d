//! [`Actuator`] implementation for an L298N style H-bridge driven from the Pi's GPIO

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use rppal::gpio::{Gpio, OutputPin};

use super::{check_duty_cycle, Actuator, ActuatorError, Motion};
use crate::params::HBridgePins;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// H-bridge driver.
///
/// PWM on the enable lines is generated in software by rppal, which is adequate at the low
/// frequencies the bridge is driven at.
pub struct HBridge {
    /// Direction lines, in IN1..IN4 order
    lines: [OutputPin; 4],

    ena: OutputPin,
    enb: OutputPin,

    pwm_frequency_hz: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HBridge {

    /// Claim the pins and put the bridge into a stopped state.
    pub fn new(pins: &HBridgePins, pwm_frequency_hz: f64) -> Result<Self, ActuatorError> {
        let gpio = Gpio::new().map_err(gpio_err)?;

        let output = |pin: u8| -> Result<OutputPin, ActuatorError> {
            Ok(gpio.get(pin).map_err(gpio_err)?.into_output_low())
        };

        let mut bridge = Self {
            lines: [
                output(pins.in1)?,
                output(pins.in2)?,
                output(pins.in3)?,
                output(pins.in4)?,
            ],
            ena: output(pins.ena)?,
            enb: output(pins.enb)?,
            pwm_frequency_hz,
        };

        bridge.set_duty_cycle(0.0)?;

        debug!("H-bridge initialised on {:?} at {} Hz", pins, pwm_frequency_hz);

        Ok(bridge)
    }
}

impl Actuator for HBridge {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        let duty = check_duty_cycle(percent)? / 100.0;

        for pin in [&mut self.ena, &mut self.enb] {
            pin.set_pwm_frequency(self.pwm_frequency_hz, duty).map_err(gpio_err)?;
        }

        Ok(())
    }

    fn set_motion(&mut self, motion: Motion) -> Result<(), ActuatorError> {
        for (pin, high) in self.lines.iter_mut().zip(motion.line_levels()) {
            if high {
                pin.set_high();
            }
            else {
                pin.set_low();
            }
        }

        Ok(())
    }
}

impl Drop for HBridge {
    fn drop(&mut self) {
        // Leave the motors unpowered
        if let Err(e) = self.stop() {
            warn!("Could not stop the H-bridge: {}", e);
        }
        for pin in [&mut self.ena, &mut self.enb] {
            if let Err(e) = pin.clear_pwm() {
                warn!("Could not clear PWM on pin {}: {}", pin.pin(), e);
            }
            pin.set_low();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn gpio_err(e: rppal::gpio::Error) -> ActuatorError {
    ActuatorError::Gpio(e.to_string())
}
