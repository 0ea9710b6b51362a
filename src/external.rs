//! External programs: PATH resolution, image replacement in a forked child,
//! and mapping of child termination to shell exit statuses.

use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, execvp};
use tracing::debug;

use crate::command::{Command, ExitCode, STATUS_INTERNAL_FAILURE, STATUS_NOT_FOUND};
use crate::env::Environment;
use crate::error::ExecError;

/// Argument vector of an external command, converted for `execvp` before
/// forking so the child does no fallible conversion of its own.
#[derive(Debug)]
pub struct ExternalProgram {
    argv: Vec<CString>,
}

impl ExternalProgram {
    pub fn new(command: &Command) -> Result<Self, ExecError> {
        let argv = command
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ExecError::Nul {
                name: command.name().unwrap_or_default().to_string(),
                source,
            })?;
        Ok(Self { argv })
    }

    fn name(&self) -> Cow<'_, str> {
        self.argv
            .first()
            .map_or(Cow::Borrowed(""), |name| name.to_string_lossy())
    }

    /// Replaces the current process image; only returns by exiting 127.
    ///
    /// Must only be called in a forked child.
    pub fn exec(&self) -> ! {
        if let Some(program) = self.argv.first() {
            // execvp only returns on failure.
            let _ = execvp(program, &self.argv);
        }
        eprintln!("{}: command not found", self.name());
        exit_child(STATUS_NOT_FOUND)
    }
}

/// Terminates a forked child without running the parent's exit handlers.
///
/// Buffered standard output is not flushed; callers that wrote through it
/// flush first.
pub fn exit_child(status: ExitCode) -> ! {
    // SAFETY: _exit has no preconditions; it never returns.
    unsafe { libc::_exit(status) }
}

/// Shell status of a terminated child: its exit code, or 128 plus the
/// signal that killed it.
pub fn exit_code_of(status: WaitStatus) -> ExitCode {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => STATUS_INTERNAL_FAILURE,
    }
}

/// Blocks until `pid` terminates and returns its shell status.
///
/// Deaths by signal are reported on stderr, except `SIGPIPE` when
/// `quiet_sigpipe` is set: early pipeline stages routinely die that way once
/// their reader has gone.
pub fn wait_for_child(pid: Pid, name: &str, quiet_sigpipe: bool) -> Result<ExitCode, ExecError> {
    let status = loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => break other.map_err(ExecError::Wait)?,
        }
    };
    debug!(%pid, ?status, "child finished");

    match status {
        WaitStatus::Signaled(_, Signal::SIGPIPE, _) if quiet_sigpipe => {}
        WaitStatus::Signaled(_, signal, _) => {
            eprintln!("{}: killed by signal {}", name, signal as i32);
        }
        WaitStatus::Exited(..) => {}
        other => eprintln!("{}: unexpected termination: {:?}", name, other),
    }
    Ok(exit_code_of(status))
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path, or relative with multiple components (e.g. `bin/sh` or
///   `./foo`): returned if it is an executable file.
/// - Single path component: each directory of `search_paths` (a PATH value) is
///   searched in order and the first executable match is returned.
/// - Empty path: `None`.
///
/// Used for diagnostics only; `execvp` performs its own search when running.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(first), None) if !path.is_absolute() => {
            find_in_path(search_paths, first.as_os_str()).map(Cow::Owned)
        }
        _ => is_executable(path).then_some(Cow::Borrowed(path)),
    }
}

/// Looks `name` up in the environment's `PATH`.
pub fn lookup_program(env: &Environment, name: &str) -> Option<PathBuf> {
    let search_paths = env.get_var("PATH")?;
    find_command_path(OsStr::new(&search_paths), Path::new(name)).map(Cow::into_owned)
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
