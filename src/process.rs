//! Blocking invocation of external programs.
//!
//! Only exit statuses are inspected; output is inherited from the caller.

use crate::error::{Error, Result};
use std::process::{Child, Command, ExitStatus};

/// Human-readable name of a command, program plus first argument.
pub(crate) fn label(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().into_owned();
    match cmd.get_args().next() {
        Some(arg) => format!("{} {}", program, arg.to_string_lossy()),
        None => program,
    }
}

/// Run `cmd` to completion, failing on a non-zero exit.
pub(crate) fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd.status().map_err(|source| Error::Spawn {
        program: label(cmd),
        source,
    })?;
    check(cmd, status)
}

/// Start `cmd` without waiting for it.
pub(crate) fn spawn(cmd: &mut Command) -> Result<Child> {
    cmd.spawn().map_err(|source| Error::Spawn {
        program: label(cmd),
        source,
    })
}

fn check(cmd: &Command, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            program: label(cmd),
            status,
        })
    }
}

/// Numeric severity of an exit status: the exit code, or 128 + signal.
pub(crate) fn severity(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
