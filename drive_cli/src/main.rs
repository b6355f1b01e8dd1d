//! # Drive Command Line
//!
//! Interactive control surface for the drive executable. Each line entered is sent as a request
//! and the response printed.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod client;
mod cmd;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use color_eyre::{Result, eyre::WrapErr};
use comms_if::{
    net::{zmq, NetParams},
    tc::{Tc, TcResponse},
};
use rustyline::{error::ReadlineError, DefaultEditor};
use structopt::StructOpt;

use client::DriveClient;
use cmd::DriveCmd;
use util::host;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "drive $ ";

/// History file, relative to the software root.
const HISTORY_PATH: &str = "data/drive_cli_history.txt";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "drive_cli", about = "Interactive control of the drive executable")]
struct Opts {
    /// Endpoint of the drive executable, taken from `net.toml` if not given
    #[structopt(short, long)]
    endpoint: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    let endpoint = match opts.endpoint {
        Some(e) => e,
        None => {
            let net_params: NetParams = util::params::load("net.toml")
                .wrap_err("Failed to load the network parameters")?;
            net_params.drive_client_endpoint
        }
    };

    let ctx = zmq::Context::new();
    let client = DriveClient::new(&ctx, &endpoint)
        .wrap_err("Failed to create the client")?;

    println!("Connecting to {}, type `help` for a list of commands", endpoint);

    let mut rl = DefaultEditor::new().wrap_err("Failed to create the line editor")?;

    let history_path = host::get_drive_sw_root().ok().map(|r| r.join(HISTORY_PATH));
    if let Some(ref path) = history_path {
        if rl.load_history(path).is_err() {
            println!("No history detected");
        }
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled Error: {:?}", e);
                break
            }
        };

        if line.trim().is_empty() {
            continue
        }
        rl.add_history_entry(line.as_str()).ok();

        let cmd = match DriveCmd::from_line(&line) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", e);
                continue
            }
        };

        let tc = match cmd.to_tc() {
            Some(t) => t,
            None => break,
        };

        if !client.is_connected() {
            println!("Warning: not connected to the drive executable");
        }

        match execute(&client, &tc) {
            Ok(r) => print_response(&r),
            Err(e) => println!("Error: {}", e),
        }
    }

    if let Some(path) = history_path {
        save_history(&mut rl, path);
    }

    println!("Exiting...");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Send the telecommand, planning forward distances from the current status first.
fn execute(client: &DriveClient, tc: &Tc) -> Result<TcResponse> {
    let expected_duration_s = match *tc {
        Tc::TimedTurn { duration_s, .. } | Tc::TimedForward { duration_s } => duration_s,
        Tc::ForwardDistance { distance_m } => match client.send(&Tc::Status, 0.0)? {
            TcResponse::Status(s) if s.speed_ms > 0.0 => {
                let duration_s = distance_m / s.speed_ms;
                println!(
                    "Planned {:.2} m at {:.3} m/s: {:.2} s",
                    distance_m, s.speed_ms, duration_s
                );
                duration_s
            },
            _ => {
                println!("Planned {:.2} m: --- s", distance_m);
                0.0
            }
        },
        _ => 0.0,
    };

    Ok(client.send(tc, expected_duration_s)?)
}

fn print_response(response: &TcResponse) {
    match response {
        TcResponse::Status(s) => {
            println!("Drive strength: {}", s.drive_strength);
            println!(
                "Speed:          {:.3} m/s (max {:.3} m/s)",
                s.speed_ms, s.max_speed_ms
            );
            println!("Busy:           {}", s.busy);
        },
        r => println!("{}", r.to_wire()),
    }
}

fn save_history(rl: &mut DefaultEditor, path: PathBuf) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    if let Err(e) = rl.save_history(&path) {
        println!("Could not save history: {}", e);
    }
}
