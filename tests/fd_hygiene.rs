//! The interpreter must not leak descriptors: after a pipeline finishes the
//! process holds exactly the descriptors it held before.
#![cfg(target_os = "linux")]

use std::fs;
use std::sync::{Mutex, MutexGuard};

use tinysh::builtin::BuiltinTable;
use tinysh::{Interpreter, ShellConfig};

/// Descriptor counts are process-wide, so the tests must not overlap.
fn lock_fds() -> MutexGuard<'static, ()> {
    static MUTEX: Mutex<()> = Mutex::new(());
    MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn pipelines_close_every_pipe_end() {
    let _lock = lock_fds();
    let mut sh = Interpreter::new(BuiltinTable::default(), ShellConfig::default());
    sh.run_line("true");
    let before = open_fds();

    assert_eq!(sh.execute_line("true | true | true"), Ok(0));
    assert_eq!(sh.execute_line("false | cat | true"), Ok(0));
    assert_eq!(sh.execute_line("true | false"), Ok(1));

    assert_eq!(open_fds(), before);
}

#[test]
fn redirected_builtin_restores_standard_streams() {
    let _lock = lock_fds();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let err = dir.path().join("err.txt");
    let mut sh = Interpreter::new(BuiltinTable::default(), ShellConfig::default());
    let before = open_fds();

    let line = format!("echo -n > '{}' 2> '{}'", out.display(), err.display());
    assert_eq!(sh.execute_line(&line), Ok(0));
    let line = format!("echo -n < '{}'", dir.path().join("missing").display());
    assert_eq!(sh.execute_line(&line), Ok(1));

    assert_eq!(open_fds(), before);
    assert!(out.exists());
    assert!(err.exists());
}
