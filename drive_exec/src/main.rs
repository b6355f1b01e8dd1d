//! # Drive Executable
//!
//! This executable is responsible for driving the two DC motors of the vehicle:
//! - Serving speed, manual driving and timed action requests from control clients
//! - Converting between drive strength and speed using the calibration
//! - Ensuring only one timed action runs at once

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::sync::Arc;

use color_eyre::{Result, eyre::{eyre, WrapErr}};
use comms_if::net::{zmq, NetParams};
use log::{info, warn};
use structopt::StructOpt;

// Internal
use drive_lib::{
    actuator::Actuator,
    calib::CalibrationConverter,
    params::DriveExecParams,
    scheduler::ActionScheduler,
    tc_processor::TcProcessor,
    tc_server::TcServer,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "drive_exec", about = "Drives the motors in response to control requests")]
struct Opts {
    /// Use the simulated actuator rather than the H-bridge
    #[structopt(long)]
    sim: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opts = Opts::from_args();

    // Initialise session
    let session = Session::new(
        "drive_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Drive Executable\n");
    info!("Running on: {}", host::get_platform());
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Failed to load the network parameters")?;
    let params: DriveExecParams = util::params::load("drive_exec.toml")
        .wrap_err("Failed to load the drive parameters")?;
    params.validate().wrap_err("Invalid drive parameters")?;

    info!("Parameters loaded");

    // ---- MODULE INITIALISATION ----

    let converter = CalibrationConverter::new(params.calib)
        .wrap_err("Invalid calibration")?;

    info!(
        "Calibration loaded, estimated maximum speed {:.3} m/s",
        converter.max_speed_estimate()
    );

    let actuator = init_actuator(&params, opts.sim)?;
    let scheduler = ActionScheduler::new(actuator, params.default_drive_strength);
    let processor = Arc::new(TcProcessor::new(scheduler, converter));

    info!("Scheduler initialised");

    // ---- SERVER INITIALISATION ----

    let ctx = zmq::Context::new();

    let mut server = TcServer::new(&ctx, &net_params, params.num_workers, processor.clone())
        .wrap_err("Failed to initialise server")?;

    // Ctrl-C and SIGTERM end the main loop so the motors are stopped on the way out
    let stop_handle = server.stop_handle()
        .ok_or_else(|| eyre!("The server's stop handle has already been taken"))?;
    ctrlc::set_handler(move || {
        info!("Stop requested");
        if let Err(e) = stop_handle.stop() {
            warn!("Could not stop the server: {}", e);
        }
    }).wrap_err("Failed to install the stop signal handler")?;

    info!("Server listening on {}", net_params.drive_server_endpoint);

    // ---- MAIN LOOP ----

    let result = server.run();

    // ---- SHUTDOWN ----

    // Stop the motors straight away, a worker may still be part way through a timed action
    processor.scheduler().shutdown();
    drop(server);

    session.exit();

    result.wrap_err("Server failed")
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
fn init_actuator(params: &DriveExecParams, sim: bool) -> Result<Box<dyn Actuator>> {
    use drive_lib::actuator::{hbridge::HBridge, SimActuator};

    if sim {
        info!("Using the simulated actuator");
        return Ok(Box::new(SimActuator::new()))
    }

    let bridge = HBridge::new(&params.pins, params.pwm_frequency_hz)
        .wrap_err("Failed to initialise the H-bridge")?;

    info!("H-bridge initialised");

    Ok(Box::new(bridge))
}

#[cfg(not(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64"))))]
fn init_actuator(_params: &DriveExecParams, sim: bool) -> Result<Box<dyn Actuator>> {
    use drive_lib::actuator::SimActuator;

    if !sim {
        warn!("No GPIO on {}, using the simulated actuator", host::get_platform());
    }

    Ok(Box::new(SimActuator::new()))
}
