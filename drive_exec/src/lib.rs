//! # Drive library.
//!
//! This library allows the drive executable, its tests and benchmarks to access the items defined
//! inside the drive crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator interface - drives the motors through the H-bridge, or a simulation of it
pub mod actuator;

/// Calibration - converts between drive strength and speed
pub mod calib;

/// Parameters for the drive executable
pub mod params;

/// Action scheduler - sequences actuator commands and enforces that one timed action runs at once
pub mod scheduler;

/// Telecommand processor - executes requests against the scheduler
pub mod tc_processor;

/// Telecommand server - recieves requests from clients and hands them to worker threads
pub mod tc_server;
