//! # Command line commands
//!
//! Each line entered at the prompt is parsed into a [`DriveCmd`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tc::{DriveKey, KeyAction, Tc, TurnDirection, DEFAULT_ACTION_DURATION_S};
use structopt::{clap::AppSettings, StructOpt};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command entered at the prompt.
#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(name = "drive", no_version)]
pub enum DriveCmd {
    /// Set the drive strength, between 0 and 255.
    #[structopt(name = "speed", setting = AppSettings::AllowNegativeNumbers)]
    Speed {
        level: i64,
    },

    /// Set the drive strength needed to reach a speed in meters/second.
    #[structopt(name = "speed-ms")]
    SpeedMs {
        speed_ms: f64,
    },

    /// Press or release a manual driving key.
    #[structopt(name = "key")]
    Key {
        /// `down` or `up`
        action: String,

        /// One of `w`, `a`, `s` or `d`
        key: String,
    },

    /// Turn on the spot for a number of seconds.
    #[structopt(name = "turn", setting = AppSettings::AllowNegativeNumbers)]
    Turn {
        /// `left` or `right`
        #[structopt(parse(try_from_str = parse_dir))]
        dir: TurnDirection,

        /// Duration in seconds, 1 second if not given
        duration_s: Option<f64>,
    },

    /// Drive forwards for a number of seconds.
    #[structopt(name = "forward", setting = AppSettings::AllowNegativeNumbers)]
    Forward {
        /// Duration in seconds, 1 second if not given
        duration_s: Option<f64>,
    },

    /// Drive forwards for a distance in meters at the current speed.
    #[structopt(name = "dist")]
    Dist {
        distance_m: f64,
    },

    /// Show the drive strength, estimated speed and whether a timed action is running.
    #[structopt(name = "status")]
    Status,

    /// Exit the command line.
    #[structopt(name = "exit")]
    Exit,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveCmd {
    /// Parse a line entered at the prompt.
    pub fn from_line(line: &str) -> Result<Self, structopt::clap::Error> {
        Self::from_iter_safe(std::iter::once("drive").chain(line.split_whitespace()))
    }

    /// The telecommand to send for this command, `None` for commands handled locally.
    pub fn to_tc(&self) -> Option<Tc> {
        Some(match self {
            DriveCmd::Speed { level } => Tc::SetSpeed { level: *level },
            DriveCmd::SpeedMs { speed_ms } => Tc::SetSpeedMs { speed_ms: *speed_ms },
            DriveCmd::Key { action, key } => Tc::ManualDrive {
                action: KeyAction::from_str(action),
                key: DriveKey::from_str(key),
            },
            DriveCmd::Turn { dir, duration_s } => Tc::TimedTurn {
                dir: *dir,
                duration_s: duration_s.unwrap_or(DEFAULT_ACTION_DURATION_S),
            },
            DriveCmd::Forward { duration_s } => Tc::TimedForward {
                duration_s: duration_s.unwrap_or(DEFAULT_ACTION_DURATION_S),
            },
            DriveCmd::Dist { distance_m } => Tc::ForwardDistance { distance_m: *distance_m },
            DriveCmd::Status => Tc::Status,
            DriveCmd::Exit => return None,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_dir(s: &str) -> Result<TurnDirection, String> {
    TurnDirection::from_str(s).ok_or_else(|| format!("expected left or right, found {}", s))
}

#[cfg(test)]
mod test {
    use super::*;

    fn tc(line: &str) -> Option<Tc> {
        DriveCmd::from_line(line).unwrap().to_tc()
    }

    #[test]
    fn test_commands() {
        assert_eq!(tc("speed 120"), Some(Tc::SetSpeed { level: 120 }));
        assert_eq!(tc("speed -3"), Some(Tc::SetSpeed { level: -3 }));
        assert_eq!(tc("speed-ms 0.34"), Some(Tc::SetSpeedMs { speed_ms: 0.34 }));
        assert_eq!(
            tc("key down w"),
            Some(Tc::ManualDrive { action: Some(KeyAction::Down), key: Some(DriveKey::Forward) })
        );
        assert_eq!(
            tc("turn right 2.5"),
            Some(Tc::TimedTurn { dir: TurnDirection::Right, duration_s: 2.5 })
        );
        assert_eq!(tc("  forward  "), Some(Tc::TimedForward { duration_s: 1.0 }));
        assert_eq!(tc("dist 0.5"), Some(Tc::ForwardDistance { distance_m: 0.5 }));
        assert_eq!(tc("status"), Some(Tc::Status));
        assert_eq!(tc("exit"), None);
    }

    #[test]
    fn test_unknown_key_passed_through() {
        // The executable decides what to do with unknown keys
        assert_eq!(
            tc("key down q"),
            Some(Tc::ManualDrive { action: Some(KeyAction::Down), key: None })
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert!(DriveCmd::from_line("turn up 1").is_err());
        assert!(DriveCmd::from_line("speed fast").is_err());
        assert!(DriveCmd::from_line("jump").is_err());
        assert!(DriveCmd::from_line("").is_err());
    }
}
