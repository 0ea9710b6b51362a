//! Rebinding of a process's standard streams to files.
//!
//! Children apply redirections with [`apply`]: their descriptor table dies
//! with them, so nothing needs undoing. Builtins run inside the interpreter
//! process and use [`apply_saved`], which first duplicates fds 0, 1 and 2 and
//! hands back a [`SavedStdFds`] that puts them back when restored or dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::unistd::dup2;
use tracing::{debug, warn};

use crate::command::{RedirectMode, Redirection};
use crate::error::RedirectError;

const STD_FDS: [RawFd; 3] = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];

/// Permission bits of files created by `>` and `>>`, before the umask.
const CREATE_MODE: u32 = 0o644;

/// Duplicates of the interpreter's fds 0, 1 and 2 taken before a builtin's
/// redirections were applied.
///
/// The duplicates are close-on-exec, so children never inherit them.
#[derive(Debug)]
pub struct SavedStdFds {
    saved: Option<[OwnedFd; 3]>,
}

impl SavedStdFds {
    pub fn save() -> Result<Self, RedirectError> {
        let stdin = io::stdin().as_fd().try_clone_to_owned();
        let stdout = io::stdout().as_fd().try_clone_to_owned();
        let stderr = io::stderr().as_fd().try_clone_to_owned();
        let saved = [
            stdin.map_err(RedirectError::Save)?,
            stdout.map_err(RedirectError::Save)?,
            stderr.map_err(RedirectError::Save)?,
        ];
        Ok(Self { saved: Some(saved) })
    }

    /// Rebinds fds 0, 1 and 2 to the saved descriptors and closes the copies.
    pub fn restore(mut self) -> Result<(), RedirectError> {
        self.restore_in_place()
    }

    fn restore_in_place(&mut self) -> Result<(), RedirectError> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        for (fd, copy) in STD_FDS.into_iter().zip(saved.iter()) {
            if let Err(source) = dup2(copy.as_raw_fd(), fd) {
                if result.is_ok() {
                    result = Err(RedirectError::Restore { fd, source });
                }
            }
        }
        result
    }
}

impl Drop for SavedStdFds {
    fn drop(&mut self) {
        if let Err(e) = self.restore_in_place() {
            warn!("{}", e);
        }
    }
}

fn open_target(redirection: &Redirection) -> Result<File, RedirectError> {
    let mut options = OpenOptions::new();
    match redirection.mode {
        RedirectMode::Truncate => options.write(true).create(true).truncate(true),
        RedirectMode::Append => options.append(true).create(true),
        RedirectMode::ReadFromFile => options.read(true),
    };
    options
        .mode(CREATE_MODE)
        .open(&redirection.filename)
        .map_err(|source| RedirectError::Open {
            filename: redirection.filename.clone(),
            source,
        })
}

fn bind(redirection: &Redirection) -> Result<(), RedirectError> {
    let file = open_target(redirection)?;
    let target_fd = match redirection.mode {
        RedirectMode::ReadFromFile => libc::STDIN_FILENO,
        _ => redirection.target_fd,
    };
    dup2(file.as_raw_fd(), target_fd).map_err(|source| RedirectError::Bind {
        filename: redirection.filename.clone(),
        fd: target_fd,
        source,
    })?;
    debug!(fd = target_fd, file = %redirection.filename, mode = ?redirection.mode, "redirected");
    // `file` closes its own descriptor here; `target_fd` keeps the open file.
    Ok(())
}

/// Applies redirections left to right, stopping at the first failure.
pub fn apply(redirections: &[Redirection]) -> Result<(), RedirectError> {
    redirections.iter().try_for_each(bind)
}

/// Saves fds 0, 1 and 2, then applies redirections.
///
/// On failure the saved descriptors are restored before the error is
/// returned, so the caller's streams are untouched.
pub fn apply_saved(redirections: &[Redirection]) -> Result<SavedStdFds, RedirectError> {
    let saved = SavedStdFds::save()?;
    apply(redirections)?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};

    fn redirection(fd: RawFd, mode: RedirectMode, path: &std::path::Path) -> Redirection {
        Redirection::new(fd, mode, path.to_string_lossy())
    }

    #[test]
    fn test_truncate_creates_and_empties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "old contents").unwrap();

        let mut file = open_target(&redirection(1, RedirectMode::Truncate, &path)).unwrap();
        file.write_all(b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        let created = dir.path().join("fresh.txt");
        open_target(&redirection(1, RedirectMode::Truncate, &created)).unwrap();
        assert!(created.exists());
    }

    #[test]
    fn test_append_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.log");
        fs::write(&path, "one\n").unwrap();

        let mut file = open_target(&redirection(2, RedirectMode::Append, &path)).unwrap();
        file.write_all(b"two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_read_missing_file_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let err = open_target(&redirection(0, RedirectMode::ReadFromFile, &path)).unwrap_err();
        assert!(matches!(err, RedirectError::Open { .. }));
        assert!(err.to_string().starts_with(&path.to_string_lossy().to_string()));
    }

    #[test]
    fn test_apply_rebinds_the_target_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        let third = dir.path().join("third.txt");

        // Use a private descriptor as the target so the test process's own
        // standard streams stay untouched.
        let mut holder = File::create(&first).unwrap();
        let fd = holder.as_raw_fd();
        apply(&[
            redirection(fd, RedirectMode::Truncate, &second),
            redirection(fd, RedirectMode::Truncate, &third),
        ])
        .unwrap();
        holder.write_all(b"routed").unwrap();

        assert_eq!(fs::read_to_string(&first).unwrap(), "");
        assert_eq!(fs::read_to_string(&second).unwrap(), "");
        assert_eq!(fs::read_to_string(&third).unwrap(), "routed");
    }

    #[test]
    fn test_apply_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        let later = dir.path().join("later.txt");
        let mut holder = File::create(&target).unwrap();
        let fd = holder.as_raw_fd();

        let err = apply(&[
            redirection(fd, RedirectMode::Truncate, &dir.path().join("no/such/dir")),
            redirection(fd, RedirectMode::Truncate, &later),
        ])
        .unwrap_err();
        assert!(matches!(err, RedirectError::Open { .. }));
        assert!(!later.exists());

        holder.write_all(b"still here").unwrap();
        let mut contents = String::new();
        File::open(&target)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "still here");
    }

    #[test]
    fn test_save_and_restore_without_redirections() {
        let saved = apply_saved(&[]).unwrap();
        saved.restore().unwrap();
    }
}
