//! Session management
//!
//! A session is one run of an executable. Each session gets its own directory, named after the
//! executable and the time it started, holding the log file. The start time is also the epoch
//! that log timestamps are measured from.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal imports
use crate::{host, time};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Format of the timestamp in session directory names, see
/// https://docs.rs/chrono/0.4/chrono/format/strftime/index.html
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The directory and log file of the current session.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_root: PathBuf,

    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The software root environment variable ({}) is not set", host::SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("Cannot create the session directory {0:?}: {1}")]
    CannotCreateDir(PathBuf, std::io::Error),

    #[error("A session has already been started in this process")]
    AlreadyStarted,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session for this process.
    ///
    /// The session directory `$DRIVE_SW_ROOT/{sessions_dir}/{exec_name}_{timestamp}` is created,
    /// with the log file `{exec_name}.log` inside it. Only one session can be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let root = host::get_drive_sw_root().map_err(|_| SessionError::SwRootNotSet)?;

        let epoch = Utc::now();
        SESSION_EPOCH.try_init_once(|| epoch)
            .map_err(|_| SessionError::AlreadyStarted)?;

        Self::create(&root.join(sessions_dir), exec_name, &epoch)
    }

    /// Create the session directory for a session started at `epoch`.
    fn create(
        sessions_path: &Path,
        exec_name: &str,
        epoch: &DateTime<Utc>
    ) -> Result<Self, SessionError> {
        let session_root = sessions_path.join(
            format!("{}_{}", exec_name, epoch.format(TIMESTAMP_FORMAT))
        );

        fs::create_dir_all(&session_root)
            .map_err(|e| SessionError::CannotCreateDir(session_root.clone(), e))?;

        let log_file_path = session_root.join(format!("{}.log", exec_name));

        Ok(Session {
            session_root,
            log_file_path,
        })
    }

    /// End the session, logging how long it ran for.
    pub fn exit(self) {
        info!(
            "Session {:?} ended after {:.03} s",
            self.session_root,
            get_elapsed_seconds()
        );
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the number of seconds elapsed since the start of the session.
///
/// Returns `NaN` if the session has not been started yet, so that logging from tests or from code
/// running before the session is created does not panic.
pub fn get_elapsed_seconds() -> f64 {
    SESSION_EPOCH.get()
        .and_then(|e| time::duration_to_seconds(Utc::now() - *e))
        .unwrap_or(f64::NAN)
}

/// Return a reference to the session's epoch.
///
/// # Panics
/// - If no session has been started.
pub fn get_epoch() -> &'static DateTime<Utc> {
    match SESSION_EPOCH.get() {
        Some(e) => e,
        None => panic!("Cannot get the session epoch, no session has been started"),
    }
}
