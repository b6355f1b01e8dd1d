//! # Telecommand module
//!
//! This module provides the drive control requests (telecommands) accepted by the drive
//! executable, and the outcome tokens it replies with.
//!
//! Requests are encoded as query strings, for example `timed_turn?dir=left&t=1.5`. The operation
//! name comes first, followed by `&` separated `key=value` parameters. A leading `/` is ignored so
//! that paths copied from a browser work unchanged.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Duration used by timed actions if the request doesn't include `t`.
pub const DEFAULT_ACTION_DURATION_S: f64 = 1.0;

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// A telecommand, i.e. a single request from the control surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tc {
    /// Set the drive strength. Values outside `[0, 255]` are clamped by the executable.
    ///
    /// Wire: `set_speed?val=<int>`
    SetSpeed { level: i64 },

    /// Set the drive strength needed to reach the given speed.
    ///
    /// Wire: `set_speed_ms?val=<m/s>`
    SetSpeedMs { speed_ms: f64 },

    /// A key press or release from the manual driving keys.
    ///
    /// Unrecognised actions or keys are kept as `None` and ignored by the executable.
    ///
    /// Wire: `manual_drive?act=<down|up>&key=<w|a|s|d>`
    ManualDrive {
        action: Option<KeyAction>,
        key: Option<DriveKey>,
    },

    /// Turn on the spot for a fixed duration.
    ///
    /// Wire: `timed_turn?dir=<left|right>&t=<seconds>`
    TimedTurn {
        dir: TurnDirection,
        duration_s: f64,
    },

    /// Drive forwards for a fixed duration.
    ///
    /// Wire: `timed_forward?t=<seconds>`
    TimedForward { duration_s: f64 },

    /// Drive forwards for the time needed to cover the distance at the current speed.
    ///
    /// Wire: `forward_dist?d=<meters>`
    ForwardDistance { distance_m: f64 },

    /// Request the current drive status.
    ///
    /// Wire: `status`
    Status,
}

/// The operations accepted by the drive executable, identified by the path of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetSpeed,
    SetSpeedMs,
    ManualDrive,
    TimedTurn,
    TimedForward,
    ForwardDistance,
    Status,
}

/// Whether a manual driving key was pressed or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    Down,
    Up,
}

/// The manual driving keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveKey {
    /// `w`
    Forward,
    /// `s`
    Backward,
    /// `a`
    Left,
    /// `d`
    Right,
}

/// Direction of a turn-on-the-spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    Left,
    Right,
}

/// Response sent back for every telecommand.
///
/// Every variant other than [`TcResponse::Status`] is sent as a fixed token, the status is sent
/// as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum TcResponse {
    /// `speed_ok`
    SpeedOk,
    /// `ok`
    Ok,
    /// `turn_complete`
    TurnComplete,
    /// `forward_complete`
    ForwardComplete,
    /// `locked`, a timed action is running
    Locked,
    /// `busy`, a timed action is already running
    Busy,
    /// `invalid_time`
    InvalidTime,
    /// `error`, a parameter could not be parsed
    Error,
    /// `actuator_failure`, the motor driver failed to execute a command
    ActuatorFailure,
    /// Current drive status
    Status(DriveStatus),
}

/// Possible parsing errors.
#[derive(Debug, Error, PartialEq)]
pub enum TcParseError {
    #[error("Unrecognised operation \"{0}\"")]
    UnknownOperation(String),

    #[error("Could not decode the arguments of {0:?}: {1}")]
    MalformedQuery(Operation, String),

    #[error("Drive strength \"{0}\" is not an integer")]
    InvalidLevel(String),

    #[error("Speed \"{0}\" is not a valid number")]
    InvalidSpeed(String),

    #[error("Duration \"{1}\" of {0:?} is not a valid number of seconds")]
    InvalidTime(Operation, String),

    #[error("Distance \"{0}\" is not a valid number of meters")]
    InvalidDistance(String),

    #[error("Turn direction {0:?} is not \"left\" or \"right\"")]
    InvalidDirection(Option<String>),

    #[error("Unrecognised response \"{0}\"")]
    InvalidResponse(String),
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Arguments of `set_speed` and `set_speed_ms`.
#[derive(Debug, Deserialize)]
struct ValArgs {
    val: Option<String>,
}

/// Arguments of `manual_drive`.
#[derive(Debug, Deserialize)]
struct ManualArgs {
    act: Option<String>,
    key: Option<String>,
}

/// Arguments of `timed_turn` and `timed_forward`.
#[derive(Debug, Deserialize)]
struct TimedArgs {
    dir: Option<String>,
    t: Option<String>,
}

/// Arguments of `forward_dist`.
#[derive(Debug, Deserialize)]
struct DistArgs {
    d: Option<String>,
}

/// Status report for the drive executable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveStatus {
    /// The current drive strength, in `[0, 255]`.
    pub drive_strength: u8,

    /// True if a timed action is running.
    pub busy: bool,

    /// Estimated speed at the current drive strength.
    ///
    /// Units: meters/second
    pub speed_ms: f64,

    /// Estimated speed at full drive strength.
    ///
    /// Units: meters/second
    pub max_speed_ms: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Tc {
    /// Parse a telecommand from its query string.
    ///
    /// Arguments are percent-decoded, so requests sent by a browser are accepted.
    pub fn from_query(query: &str) -> Result<Self, TcParseError> {
        let query = query.trim().trim_start_matches('/');

        let (name, args) = match query.split_once('?') {
            Some((name, args)) => (name, args),
            None => (query, ""),
        };

        let op = Operation::from_name(name)
            .ok_or_else(|| TcParseError::UnknownOperation(name.into()))?;

        match op {
            Operation::SetSpeed => {
                let level = match decode_args::<ValArgs>(op, args)?.val {
                    Some(v) => v.parse::<i64>().map_err(|_| TcParseError::InvalidLevel(v))?,
                    None => 0,
                };
                Ok(Tc::SetSpeed { level })
            }
            Operation::SetSpeedMs => {
                let v = decode_args::<ValArgs>(op, args)?.val.unwrap_or_default();
                match v.parse::<f64>() {
                    Ok(s) if s.is_finite() => Ok(Tc::SetSpeedMs { speed_ms: s }),
                    _ => Err(TcParseError::InvalidSpeed(v)),
                }
            }
            Operation::ManualDrive => {
                let args: ManualArgs = decode_args(op, args)?;
                Ok(Tc::ManualDrive {
                    action: args.act.as_deref().and_then(KeyAction::from_str),
                    key: args.key.as_deref().and_then(DriveKey::from_str),
                })
            }
            Operation::TimedTurn => {
                let args: TimedArgs = decode_args(op, args)?;

                // The duration is checked first so that a bad duration is always reported as
                // such, even with a bad direction
                let duration_s = parse_duration_s(op, args.t)?;
                let dir = match args.dir.as_deref().and_then(TurnDirection::from_str) {
                    Some(d) => d,
                    None => return Err(TcParseError::InvalidDirection(args.dir)),
                };
                Ok(Tc::TimedTurn { dir, duration_s })
            }
            Operation::TimedForward => {
                let args: TimedArgs = decode_args(op, args)?;
                Ok(Tc::TimedForward {
                    duration_s: parse_duration_s(op, args.t)?,
                })
            }
            Operation::ForwardDistance => {
                let v = decode_args::<DistArgs>(op, args)?.d.unwrap_or_default();
                match v.parse::<f64>() {
                    Ok(d) if d.is_finite() && d >= 0.0 => Ok(Tc::ForwardDistance { distance_m: d }),
                    _ => Err(TcParseError::InvalidDistance(v)),
                }
            }
            Operation::Status => Ok(Tc::Status),
        }
    }

    /// The operation this telecommand performs.
    pub fn operation(&self) -> Operation {
        match self {
            Tc::SetSpeed { .. } => Operation::SetSpeed,
            Tc::SetSpeedMs { .. } => Operation::SetSpeedMs,
            Tc::ManualDrive { .. } => Operation::ManualDrive,
            Tc::TimedTurn { .. } => Operation::TimedTurn,
            Tc::TimedForward { .. } => Operation::TimedForward,
            Tc::ForwardDistance { .. } => Operation::ForwardDistance,
            Tc::Status => Operation::Status,
        }
    }

    /// Encode the telecommand as a query string.
    pub fn to_query(&self) -> String {
        match self {
            Tc::SetSpeed { level } => format!("set_speed?val={}", level),
            Tc::SetSpeedMs { speed_ms } => format!("set_speed_ms?val={}", speed_ms),
            Tc::ManualDrive { action, key } => format!(
                "manual_drive?act={}&key={}",
                action.map(|a| a.as_str()).unwrap_or(""),
                key.map(|k| k.as_str()).unwrap_or("")
            ),
            Tc::TimedTurn { dir, duration_s } => {
                format!("timed_turn?dir={}&t={}", dir.as_str(), duration_s)
            }
            Tc::TimedForward { duration_s } => format!("timed_forward?t={}", duration_s),
            Tc::ForwardDistance { distance_m } => format!("forward_dist?d={}", distance_m),
            Tc::Status => String::from(Operation::Status.name()),
        }
    }
}

impl Operation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "set_speed" => Some(Operation::SetSpeed),
            "set_speed_ms" => Some(Operation::SetSpeedMs),
            "manual_drive" => Some(Operation::ManualDrive),
            "timed_turn" => Some(Operation::TimedTurn),
            "timed_forward" => Some(Operation::TimedForward),
            "forward_dist" => Some(Operation::ForwardDistance),
            "status" => Some(Operation::Status),
            _ => None,
        }
    }

    /// The path of the operation in a request.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetSpeed => "set_speed",
            Operation::SetSpeedMs => "set_speed_ms",
            Operation::ManualDrive => "manual_drive",
            Operation::TimedTurn => "timed_turn",
            Operation::TimedForward => "timed_forward",
            Operation::ForwardDistance => "forward_dist",
            Operation::Status => "status",
        }
    }

    /// Whether the operation is a timed action, which is answered with `busy` rather than
    /// `locked` while another timed action runs.
    pub fn is_timed(&self) -> bool {
        matches!(
            self,
            Operation::TimedTurn | Operation::TimedForward | Operation::ForwardDistance
        )
    }
}

impl TcParseError {
    /// The operation the request was for, if it was recognised.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            TcParseError::MalformedQuery(op, _) | TcParseError::InvalidTime(op, _) => Some(*op),
            TcParseError::InvalidLevel(_) => Some(Operation::SetSpeed),
            TcParseError::InvalidSpeed(_) => Some(Operation::SetSpeedMs),
            TcParseError::InvalidDistance(_) => Some(Operation::ForwardDistance),
            TcParseError::InvalidDirection(_) => Some(Operation::TimedTurn),
            TcParseError::UnknownOperation(_) | TcParseError::InvalidResponse(_) => None,
        }
    }

    /// The response that must be sent when a request fails to parse.
    ///
    /// Timed actions only ever answer with `invalid_time` for a bad request.
    pub fn response(&self) -> TcResponse {
        match self.operation() {
            Some(op) if op.is_timed() => TcResponse::InvalidTime,
            _ => TcResponse::Error,
        }
    }
}

impl TcResponse {
    /// Encode the response for sending back to the control surface.
    pub fn to_wire(&self) -> String {
        match self {
            TcResponse::Status(s) => match serde_json::to_string(s) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Could not serialize status report: {}", e);
                    String::from("error")
                }
            },
            r => String::from(r.token()),
        }
    }

    /// Parse a response recieved from the drive executable.
    pub fn from_wire(msg: &str) -> Result<Self, TcParseError> {
        let msg = msg.trim();

        if msg.starts_with('{') {
            return serde_json::from_str(msg)
                .map(TcResponse::Status)
                .map_err(|_| TcParseError::InvalidResponse(msg.into()));
        }

        Ok(match msg {
            "speed_ok" => TcResponse::SpeedOk,
            "ok" => TcResponse::Ok,
            "turn_complete" => TcResponse::TurnComplete,
            "forward_complete" => TcResponse::ForwardComplete,
            "locked" => TcResponse::Locked,
            "busy" => TcResponse::Busy,
            "invalid_time" => TcResponse::InvalidTime,
            "error" => TcResponse::Error,
            "actuator_failure" => TcResponse::ActuatorFailure,
            _ => return Err(TcParseError::InvalidResponse(msg.into())),
        })
    }

    fn token(&self) -> &'static str {
        match self {
            TcResponse::SpeedOk => "speed_ok",
            TcResponse::Ok => "ok",
            TcResponse::TurnComplete => "turn_complete",
            TcResponse::ForwardComplete => "forward_complete",
            TcResponse::Locked => "locked",
            TcResponse::Busy => "busy",
            TcResponse::InvalidTime => "invalid_time",
            TcResponse::Error => "error",
            TcResponse::ActuatorFailure => "actuator_failure",
            TcResponse::Status(_) => "status",
        }
    }
}

impl KeyAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "down" => Some(KeyAction::Down),
            "up" => Some(KeyAction::Up),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAction::Down => "down",
            KeyAction::Up => "up",
        }
    }
}

impl DriveKey {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "w" => Some(DriveKey::Forward),
            "s" => Some(DriveKey::Backward),
            "a" => Some(DriveKey::Left),
            "d" => Some(DriveKey::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriveKey::Forward => "w",
            DriveKey::Backward => "s",
            DriveKey::Left => "a",
            DriveKey::Right => "d",
        }
    }
}

impl TurnDirection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(TurnDirection::Left),
            "right" => Some(TurnDirection::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnDirection::Left => "left",
            TurnDirection::Right => "right",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode the arguments of a request.
///
/// Unknown arguments are ignored, repeating an argument is an error.
fn decode_args<A: DeserializeOwned>(op: Operation, args: &str) -> Result<A, TcParseError> {
    serde_urlencoded::from_str(args).map_err(|e| TcParseError::MalformedQuery(op, e.to_string()))
}

/// Parse the `t` argument of a timed action.
///
/// Negative and non-finite values are rejected, as are values too large to sleep for.
fn parse_duration_s(op: Operation, arg: Option<String>) -> Result<f64, TcParseError> {
    let v = match arg {
        Some(v) => v,
        None => return Ok(DEFAULT_ACTION_DURATION_S),
    };

    match v.parse::<f64>() {
        Ok(t) if t.is_finite() && Duration::try_from_secs_f64(t).is_ok() => Ok(t),
        _ => Err(TcParseError::InvalidTime(op, v)),
    }
}
