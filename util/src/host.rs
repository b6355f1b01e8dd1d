//! Host platform (linux for example) utility functions

use std::{env, path::PathBuf};

/// Name of the environment variable pointing at the root of the software tree.
///
/// Parameter files are read from `$DRIVE_SW_ROOT/params` and sessions are written under it.
pub const SW_ROOT_ENV_VAR: &str = "DRIVE_SW_ROOT";

/// Get the root directory of the software tree.
pub fn get_drive_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Short description of the host the executable is running on, e.g. `linux/arm`.
pub fn get_platform() -> String {
    format!("{}/{}", env::consts::OS, env::consts::ARCH)
}
