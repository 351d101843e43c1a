//! Startup checks: Ground has to run as root with the host utilities it
//! drives available on `PATH`.

use thiserror::Error;

use crate::os::Program;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("ground must run as root")]
    NotRoot,

    #[error("missing required programs: {}", .0.join(", "))]
    MissingPrograms(Vec<&'static str>),
}

pub fn missing_programs() -> Vec<&'static str> {
    Program::ALL
        .iter()
        .map(|program| program.name())
        .filter(|name| which::which(name).is_err())
        .collect()
}

pub fn check() -> Result<(), HealthError> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(HealthError::NotRoot);
    }
    let missing = missing_programs();
    if !missing.is_empty() {
        return Err(HealthError::MissingPrograms(missing));
    }
    Ok(())
}
