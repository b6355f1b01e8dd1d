//! # Telecommand processor module
//!
//! The telecommand processor executes requests recieved by the server against the scheduler, and
//! produces the response to send back to the control surface.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, info, warn};

// Internal
use comms_if::tc::{DriveStatus, Operation, Tc, TcResponse};
use crate::actuator::Actuator;
use crate::calib::{distance_for_duration, duration_for_distance, CalibrationConverter};
use crate::scheduler::{ActionScheduler, SchedulerError, TimedKind};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Executes telecommands.
///
/// Shared between all server workers, so requests may be executed concurrently.
pub struct TcProcessor<A: Actuator> {
    scheduler: ActionScheduler<A>,
    converter: CalibrationConverter,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl<A: Actuator> TcProcessor<A> {
    pub fn new(scheduler: ActionScheduler<A>, converter: CalibrationConverter) -> Self {
        Self {
            scheduler,
            converter,
        }
    }

    pub fn scheduler(&self) -> &ActionScheduler<A> {
        &self.scheduler
    }

    pub fn converter(&self) -> &CalibrationConverter {
        &self.converter
    }

    /// Handle a raw request from the server, returning the encoded response.
    pub fn handle_request(&self, request: &str) -> String {
        let response = match Tc::from_query(request) {
            Ok(tc) => self.exec(&tc),
            Err(e) => {
                warn!("Rejecting request \"{}\": {}", request, e);

                // While a timed action runs, the lock is reported whatever the arguments were
                match e.operation().and_then(|op| self.busy_response(op)) {
                    Some(r) => r,
                    None => e.response(),
                }
            }
        };

        response.to_wire()
    }

    /// Execute a telecommand.
    ///
    /// Blocks for the whole duration of a timed action.
    pub fn exec(&self, tc: &Tc) -> TcResponse {
        debug!("Executing {:?}", tc);

        match *tc {
            Tc::SetSpeed { level } => match self.scheduler.set_speed(level) {
                Ok(_) => TcResponse::SpeedOk,
                Err(e) => scheduler_response(e, TcResponse::Error),
            },
            Tc::SetSpeedMs { speed_ms } => {
                let drive_strength = self.converter.drive_strength_for_speed(speed_ms);
                debug!("{:.3} m/s needs drive strength {}", speed_ms, drive_strength);

                match self.scheduler.set_speed(drive_strength as i64) {
                    Ok(_) => TcResponse::SpeedOk,
                    Err(e) => scheduler_response(e, TcResponse::Error),
                }
            }
            Tc::ManualDrive { action, key } => match self.scheduler.manual_drive(action, key) {
                Ok(()) => TcResponse::Ok,
                Err(e) => scheduler_response(e, TcResponse::Error),
            },
            Tc::TimedTurn { dir, duration_s } => {
                self.timed(TimedKind::Turn(dir), duration_s, TcResponse::TurnComplete)
            }
            Tc::TimedForward { duration_s } => {
                info!(
                    "Expecting to cover {:.2} m",
                    distance_for_duration(duration_s, self.current_speed_ms())
                );
                self.timed(TimedKind::Forward, duration_s, TcResponse::ForwardComplete)
            }
            Tc::ForwardDistance { distance_m } => {
                let speed_ms = self.current_speed_ms();

                match duration_for_distance(distance_m, speed_ms) {
                    Some(duration_s) => {
                        info!(
                            "{:.2} m at {:.3} m/s takes {:.2} s",
                            distance_m, speed_ms, duration_s
                        );
                        self.timed(TimedKind::Forward, duration_s, TcResponse::ForwardComplete)
                    }
                    None => {
                        warn!("Cannot plan {} m at {:.3} m/s", distance_m, speed_ms);
                        TcResponse::InvalidTime
                    }
                }
            }
            Tc::Status => {
                let status = self.scheduler.status();
                TcResponse::Status(DriveStatus {
                    drive_strength: status.drive_strength,
                    busy: status.busy,
                    speed_ms: self.converter.forward(status.drive_strength as f64),
                    max_speed_ms: self.converter.max_speed_estimate(),
                })
            }
        }
    }

    fn timed(&self, kind: TimedKind, duration_s: f64, complete: TcResponse) -> TcResponse {
        match self.scheduler.timed_action(kind, duration_s) {
            Ok(()) => complete,
            Err(e) => scheduler_response(e, TcResponse::InvalidTime),
        }
    }

    /// The response rejecting `op` if a timed action is running.
    fn busy_response(&self, op: Operation) -> Option<TcResponse> {
        match (self.scheduler.status().busy, op) {
            (false, _) | (true, Operation::Status) => None,
            (true, op) if op.is_timed() => Some(TcResponse::Busy),
            (true, _) => Some(TcResponse::Locked),
        }
    }

    /// Estimated speed at the current drive strength.
    fn current_speed_ms(&self) -> f64 {
        self.converter.forward(self.scheduler.status().drive_strength as f64)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a scheduler error onto its response, `invalid` being used for invalid parameters.
fn scheduler_response(err: SchedulerError, invalid: TcResponse) -> TcResponse {
    match err {
        SchedulerError::Locked => TcResponse::Locked,
        SchedulerError::Busy => TcResponse::Busy,
        SchedulerError::InvalidParameter(p) => {
            warn!("Invalid parameter: {}", p);
            invalid
        }
        SchedulerError::ActuatorFailure(e) => {
            warn!("Actuator failure: {}", e);
            TcResponse::ActuatorFailure
        }
    }
}
