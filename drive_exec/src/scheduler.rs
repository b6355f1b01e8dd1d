//! # Action Scheduler
//!
//! The scheduler owns the actuator and sequences every command sent to it. Only one timed action
//! may run at once, and while it runs every other request is rejected rather than queued.
//!
//! The scheduler is shared between the server's worker threads. The busy flag lives in the same
//! mutex as the actuator so that checking and setting it is a single step. The sleep of a timed
//! action happens outside the mutex, which lets other workers observe the busy flag and reject
//! their requests straight away.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use comms_if::tc::{DriveKey, KeyAction, TurnDirection};
use log::{debug, info, warn};

use crate::actuator::{duty_percent, Actuator, ActuatorError, Motion};
use crate::calib::MAX_DRIVE_STRENGTH;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sequences actuator commands, enforcing that only one timed action runs at a time.
pub struct ActionScheduler<A: Actuator> {
    state: Mutex<State<A>>,
}

/// Snapshot of the scheduler's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub drive_strength: u8,

    /// True while a timed action is running.
    pub busy: bool,
}

struct State<A> {
    actuator: A,
    drive_strength: u8,
    busy: bool,
}

/// Clears the busy flag when dropped, including on unwind.
///
/// Must only be dropped while the state mutex is not held by the same thread.
struct BusyGuard<'a, A: Actuator> {
    scheduler: &'a ActionScheduler<A>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The motions a timed action can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedKind {
    Forward,
    Turn(TurnDirection),
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("A timed action is running, the request was rejected")]
    Locked,

    #[error("A timed action is already running")]
    Busy,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("The actuator failed: {0}")]
    ActuatorFailure(ActuatorError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<A: Actuator> ActionScheduler<A> {

    /// Create a new scheduler in the idle state.
    ///
    /// Nothing is sent to the actuator until the first request arrives.
    pub fn new(actuator: A, default_drive_strength: u8) -> Self {
        Self {
            state: Mutex::new(State {
                actuator,
                drive_strength: default_drive_strength,
                busy: false,
            }),
        }
    }

    /// Set the drive strength, clamping the level into `[0, 255]`.
    ///
    /// Returns the drive strength that was set.
    pub fn set_speed(&self, level: i64) -> Result<u8, SchedulerError> {
        let mut state = self.lock();

        if state.busy {
            return Err(SchedulerError::Locked)
        }

        let drive_strength = level.clamp(0, MAX_DRIVE_STRENGTH as i64) as u8;
        state.actuator
            .set_duty_cycle(duty_percent(drive_strength))
            .map_err(SchedulerError::ActuatorFailure)?;
        state.drive_strength = drive_strength;

        debug!("Drive strength set to {}", drive_strength);

        Ok(drive_strength)
    }

    /// Start or stop a motion in response to a manual driving key.
    ///
    /// A press starts the motion at the current drive strength, a release stops the motors.
    /// Requests with an unknown action or key do nothing.
    pub fn manual_drive(
        &self,
        action: Option<KeyAction>,
        key: Option<DriveKey>
    ) -> Result<(), SchedulerError> {
        let mut state = self.lock();

        if state.busy {
            return Err(SchedulerError::Locked)
        }

        let result = match (action, key) {
            (Some(KeyAction::Down), Some(key)) => {
                let duty = duty_percent(state.drive_strength);
                match state.actuator.set_motion(key_motion(key)) {
                    Ok(()) => state.actuator.set_duty_cycle(duty),
                    Err(e) => Err(e),
                }
            },
            (Some(KeyAction::Up), Some(_)) => state.actuator.stop(),
            _ => {
                debug!("Ignoring manual drive request {:?} {:?}", action, key);
                Ok(())
            }
        };

        result.map_err(SchedulerError::ActuatorFailure)
    }

    /// Perform a timed action, returning once the motors have been stopped.
    ///
    /// The calling thread sleeps for the whole duration. Requests arriving from other threads in
    /// the meantime are rejected. A running action is reported before an invalid duration.
    pub fn timed_action(&self, kind: TimedKind, duration_s: f64) -> Result<(), SchedulerError> {
        let duration = {
            let mut state = self.lock();
            if state.busy {
                return Err(SchedulerError::Busy)
            }

            let duration = Duration::try_from_secs_f64(duration_s)
                .map_err(|e| SchedulerError::InvalidParameter(
                    format!("duration {} s: {}", duration_s, e)
                ))?;

            state.busy = true;
            duration
        };
        let _busy = BusyGuard { scheduler: self };

        info!("Starting timed {:?} for {:.3} s", kind, duration_s);

        if let Err(e) = self.start_motion(kind.motion()) {
            warn!("Timed {:?} failed to start: {}", kind, e);
            if let Err(e) = self.lock().actuator.stop() {
                warn!("Could not stop after failure: {}", e);
            }
            return Err(SchedulerError::ActuatorFailure(e))
        }

        thread::sleep(duration);

        let stopped = self.lock().actuator.stop();
        stopped.map_err(SchedulerError::ActuatorFailure)?;

        info!("Timed {:?} complete", kind);

        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock();
        SchedulerStatus {
            drive_strength: state.drive_strength,
            busy: state.busy,
        }
    }

    /// Stop the motors and remove drive, whatever state the scheduler is in.
    pub fn shutdown(&self) {
        let mut state = self.lock();

        if let Err(e) = state.actuator.stop() {
            warn!("Could not stop the actuator during shutdown: {}", e);
        }
        if let Err(e) = state.actuator.set_duty_cycle(0.0) {
            warn!("Could not zero the duty cycle during shutdown: {}", e);
        }
    }

    fn start_motion(&self, motion: Motion) -> Result<(), ActuatorError> {
        let mut state = self.lock();
        let duty = duty_percent(state.drive_strength);

        state.actuator.set_motion(motion)?;
        state.actuator.set_duty_cycle(duty)
    }

    /// Lock the state, recovering it if a previous holder panicked.
    ///
    /// Every update to the state is a single assignment, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, State<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Actuator> Drop for ActionScheduler<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<'a, A: Actuator> Drop for BusyGuard<'a, A> {
    fn drop(&mut self) {
        self.scheduler.lock().busy = false;
    }
}

impl TimedKind {
    pub fn motion(&self) -> Motion {
        match self {
            TimedKind::Forward => Motion::Forward,
            TimedKind::Turn(TurnDirection::Left) => Motion::TurnLeft,
            TimedKind::Turn(TurnDirection::Right) => Motion::TurnRight,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn key_motion(key: DriveKey) -> Motion {
    match key {
        DriveKey::Forward => Motion::Forward,
        DriveKey::Backward => Motion::Backward,
        DriveKey::Left => Motion::TurnLeft,
        DriveKey::Right => Motion::TurnRight,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::actuator::mock::{Cmd, MockActuator};

    #[test]
    fn test_set_speed_clamps() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 200);

        assert_eq!(sched.set_speed(300).unwrap(), 255);
        assert_eq!(sched.set_speed(-5).unwrap(), 0);
        assert_eq!(sched.set_speed(128).unwrap(), 128);
        assert_eq!(sched.set_speed(128).unwrap(), 128);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Cmd::Duty(100.0),
                Cmd::Duty(0.0),
                Cmd::Duty(duty_percent(128)),
                Cmd::Duty(duty_percent(128)),
            ]
        );
        assert_eq!(sched.status().drive_strength, 128);
    }

    #[test]
    fn test_manual_press_release() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 200);

        sched.manual_drive(Some(KeyAction::Down), Some(DriveKey::Forward)).unwrap();
        assert!(!sched.status().busy);
        sched.manual_drive(Some(KeyAction::Up), Some(DriveKey::Forward)).unwrap();
        assert!(!sched.status().busy);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Cmd::Motion(Motion::Forward),
                Cmd::Duty(duty_percent(200)),
                Cmd::Motion(Motion::Stop),
            ]
        );
    }

    #[test]
    fn test_manual_unknown_is_noop() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 200);

        sched.manual_drive(None, Some(DriveKey::Left)).unwrap();
        sched.manual_drive(Some(KeyAction::Down), None).unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_timed_action_sequence() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 150);

        let start = Instant::now();
        sched.timed_action(TimedKind::Turn(TurnDirection::Left), 0.1).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Cmd::Motion(Motion::TurnLeft),
                Cmd::Duty(duty_percent(150)),
                Cmd::Motion(Motion::Stop),
            ]
        );
        assert!(!sched.status().busy);
    }

    #[test]
    fn test_invalid_duration() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 200);

        for d in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(matches!(
                sched.timed_action(TimedKind::Forward, d),
                Err(SchedulerError::InvalidParameter(_))
            ));
        }

        assert!(log.lock().unwrap().is_empty());
        assert!(!sched.status().busy);

        // Zero is a valid duration
        sched.timed_action(TimedKind::Forward, 0.0).unwrap();
        assert_eq!(log.lock().unwrap().last(), Some(&Cmd::Motion(Motion::Stop)));
    }

    #[test]
    fn test_rejected_while_busy() {
        let (mock, log) = MockActuator::new();
        let sched = Arc::new(ActionScheduler::new(mock, 200));

        let start = Instant::now();
        let runner = {
            let sched = sched.clone();
            thread::spawn(move || sched.timed_action(TimedKind::Forward, 0.4))
        };

        // Wait for the action to start
        while !sched.status().busy {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        let num_cmds = log.lock().unwrap().len();

        assert!(matches!(sched.set_speed(10), Err(SchedulerError::Locked)));
        assert!(matches!(
            sched.manual_drive(Some(KeyAction::Down), Some(DriveKey::Right)),
            Err(SchedulerError::Locked)
        ));
        assert!(matches!(
            sched.timed_action(TimedKind::Turn(TurnDirection::Right), 0.1),
            Err(SchedulerError::Busy)
        ));
        assert!(matches!(
            sched.timed_action(TimedKind::Forward, -1.0),
            Err(SchedulerError::Busy)
        ));

        // Rejected requests must not reach the actuator
        assert_eq!(log.lock().unwrap().len(), num_cmds);

        runner.join().unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(!sched.status().busy);
        assert_eq!(sched.status().drive_strength, 200);
        assert_eq!(log.lock().unwrap().last(), Some(&Cmd::Motion(Motion::Stop)));

        // Idle again, so requests are accepted
        assert_eq!(sched.set_speed(10).unwrap(), 10);
    }

    #[test]
    fn test_failure_releases_lock() {
        let (mut mock, log) = MockActuator::new();
        mock.fail_on = Some(Motion::Forward);
        let sched = ActionScheduler::new(mock, 200);

        assert!(matches!(
            sched.timed_action(TimedKind::Forward, 5.0),
            Err(SchedulerError::ActuatorFailure(_))
        ));
        assert!(!sched.status().busy);
        assert_eq!(*log.lock().unwrap(), vec![Cmd::Motion(Motion::Stop)]);

        // Other motions still work
        sched.timed_action(TimedKind::Turn(TurnDirection::Right), 0.0).unwrap();
    }

    #[test]
    fn test_stop_failure_releases_lock() {
        let (mut mock, log) = MockActuator::new();
        mock.fail_on = Some(Motion::Stop);
        let sched = ActionScheduler::new(mock, 200);

        // The motion starts and the failure comes after the sleep
        assert!(matches!(
            sched.timed_action(TimedKind::Forward, 0.05),
            Err(SchedulerError::ActuatorFailure(_))
        ));
        assert!(!sched.status().busy);
        assert_eq!(
            *log.lock().unwrap(),
            vec![Cmd::Motion(Motion::Forward), Cmd::Duty(duty_percent(200))]
        );

        assert_eq!(sched.set_speed(100).unwrap(), 100);
    }

    #[test]
    fn test_set_speed_failure_keeps_level() {
        let (mut mock, log) = MockActuator::new();
        mock.fail_duty = true;
        let sched = ActionScheduler::new(mock, 200);

        assert!(matches!(sched.set_speed(50), Err(SchedulerError::ActuatorFailure(_))));
        assert_eq!(sched.status().drive_strength, 200);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_shutdown() {
        let (mock, log) = MockActuator::new();
        let sched = ActionScheduler::new(mock, 200);

        sched.shutdown();
        assert_eq!(
            *log.lock().unwrap(),
            vec![Cmd::Motion(Motion::Stop), Cmd::Duty(0.0)]
        );
    }
}
