//! External program execution
//!
//! Both output streams of a child are captured into separate buffers and joined when it exits.
//! Nothing here depends on the relative order of stdout and stderr.

use std::ffi::OsStr;
use std::process::{Command, Output};

use log::{debug, trace};

use crate::error::ProcessError;

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().into_owned()
}

/// Renders `command` the way it would be typed in a shell, for diagnostics
pub fn display(command: &Command) -> String {
    let mut line = program_name(command);

    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }

    line
}

/// Runs `command` to completion, returning its captured output if it exited successfully.
pub fn run(command: &mut Command) -> Result<Output, ProcessError> {
    let program = program_name(command);

    debug!("Running `{}`", display(command));

    let output = command
        .output()
        .map_err(|err| ProcessError::Spawn(program.clone(), err))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        trace!("{}: {}", program, line);
    }

    for line in String::from_utf8_lossy(&output.stderr).lines() {
        debug!("{} (stderr): {}", program, line);
    }

    if !output.status.success() {
        return Err(ProcessError::Failed {
            program,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output)
}

/// Runs `command` and returns its standard output as text
pub fn capture(command: &mut Command) -> Result<String, ProcessError> {
    let output = run(command)?;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Builds a command for `program`, prefixed with `sudo` when `privileged` is set
pub fn command<S: AsRef<OsStr>>(program: S, privileged: bool) -> Command {
    if privileged {
        let mut command = Command::new("sudo");
        command.arg(program);
        command
    } else {
        Command::new(program)
    }
}
