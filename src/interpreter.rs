use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::signal::{SigHandler, Signal, signal};
use nix::unistd::{ForkResult, Pid, dup2, fork};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, warn};

use crate::builtin::{Builtin, BuiltinTable, Context, Io};
use crate::command::{
    Command, ExitCode, Pipeline, STATUS_CANNOT_EXECUTE, STATUS_INTERNAL_FAILURE,
    STATUS_SYNTAX_ERROR,
};
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::error::{ExecError, LexError, SyntaxError};
use crate::external::{ExternalProgram, exit_child, wait_for_child};
use crate::{lexer, parser, redirect};

/// A command interpreter that parses lines into pipelines and runs them.
///
/// Builtins run inside this process with their redirections applied and
/// undone around the call; everything else, and every stage of a
/// multi-command pipeline, runs in a forked child.
///
/// Example
/// ```no_run
/// use tinysh::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run_line("echo hello | tr a-z A-Z");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: BuiltinTable,
    config: ShellConfig,
}

impl Interpreter {
    /// Create a new interpreter with a custom builtin table and settings.
    pub fn new(builtins: BuiltinTable, config: ShellConfig) -> Self {
        Self {
            env: Environment::new(),
            builtins,
            config,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn builtins(&self) -> &BuiltinTable {
        &self.builtins
    }

    fn tokenize(&self, line: &str) -> Result<Vec<String>, LexError> {
        if self.config.strict_quotes {
            lexer::tokenize_strict(line)
        } else {
            Ok(lexer::tokenize(line))
        }
    }

    /// Tokenizes and parses a line; `Ok(None)` for a blank line.
    pub fn parse_line(&self, line: &str) -> Result<Option<Pipeline>, SyntaxError> {
        let tokens = self.tokenize(line)?;
        debug!(?tokens, "tokenized");
        if tokens.is_empty() {
            return Ok(None);
        }
        let pipeline = parser::parse(tokens, &self.config.limits)?;
        Ok(Some(pipeline))
    }

    /// Parses and executes a line. A syntax error executes nothing.
    ///
    /// A blank line leaves the last status unchanged and returns it.
    pub fn execute_line(&mut self, line: &str) -> Result<ExitCode, SyntaxError> {
        match self.parse_line(line)? {
            Some(pipeline) => Ok(self.execute(&pipeline)),
            None => Ok(self.env.last_status),
        }
    }

    /// Like [`Interpreter::execute_line`], reporting syntax errors on stderr
    /// with status 2.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        match self.execute_line(line) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", e);
                self.env.last_status = STATUS_SYNTAX_ERROR;
                STATUS_SYNTAX_ERROR
            }
        }
    }

    /// Runs a pipeline and returns the status of its last stage.
    pub fn execute(&mut self, pipeline: &Pipeline) -> ExitCode {
        debug!(%pipeline, stages = pipeline.len(), "executing");
        let status = match pipeline.single() {
            Some(command) => self.execute_command(command),
            None => self.execute_pipeline(pipeline.stages()),
        };
        debug!(status, "pipeline finished");
        self.env.last_status = status;
        status
    }

    /// Runs one command without creating any pipe.
    fn execute_command(&mut self, command: &Command) -> ExitCode {
        let name = command.name().unwrap_or_default();
        if let Some(builtin) = self.builtins.lookup(name) {
            return run_builtin(builtin, command, &mut self.env, &self.builtins);
        }
        match self.spawn_stage(command, None, None) {
            Ok(pid) => wait_for_child(pid, name, false).unwrap_or_else(|e| {
                eprintln!("{}", e);
                STATUS_INTERNAL_FAILURE
            }),
            Err(e) => {
                eprintln!("{}", e);
                failure_status(&e)
            }
        }
    }

    /// Runs every stage in its own child, connected by pipes.
    fn execute_pipeline(&mut self, stages: &[Command]) -> ExitCode {
        let mut children: Vec<(Pid, &str)> = Vec::with_capacity(stages.len());
        let mut last_started = false;
        let mut prev_read: Option<OwnedFd> = None;

        for (i, stage) in stages.iter().enumerate() {
            let is_last = i + 1 == stages.len();
            let (next_read, next_write) = if is_last {
                (None, None)
            } else {
                match cloexec_pipe() {
                    Ok((read, write)) => (Some(read), Some(write)),
                    Err(e) => {
                        eprintln!("{}", e);
                        break;
                    }
                }
            };

            match self.spawn_stage(stage, prev_read.as_ref(), next_write.as_ref()) {
                Ok(pid) => {
                    children.push((pid, stage.name().unwrap_or_default()));
                    last_started = is_last;
                }
                Err(e) => {
                    eprintln!("{}", e);
                    break;
                }
            }

            // The parent's copies of both ends go now: a reader only sees
            // end-of-stream once every write end is closed.
            drop(next_write);
            prev_read = next_read;
        }
        drop(prev_read);

        let mut status = STATUS_INTERNAL_FAILURE;
        let count = children.len();
        for (i, (pid, name)) in children.into_iter().enumerate() {
            let is_final = last_started && i + 1 == count;
            match wait_for_child(pid, name, !is_final) {
                Ok(code) if is_final => status = code,
                Ok(_) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
        status
    }

    /// Forks a child for `command` with its stdin and stdout optionally
    /// bound to pipe ends, and returns the child's pid.
    fn spawn_stage(
        &mut self,
        command: &Command,
        stdin: Option<&OwnedFd>,
        stdout: Option<&OwnedFd>,
    ) -> Result<Pid, ExecError> {
        let program = if self.builtins.contains(command.name().unwrap_or_default()) {
            None
        } else {
            Some(ExternalProgram::new(command)?)
        };

        // Anything still buffered would otherwise be written twice.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        // SAFETY: the child only rebinds descriptors, opens files and then
        // either replaces its image or runs a builtin and exits with _exit.
        match unsafe { fork() }.map_err(ExecError::Fork)? {
            ForkResult::Parent { child } => {
                debug!(pid = %child, command = %command, "spawned");
                Ok(child)
            }
            ForkResult::Child => self.run_in_child(command, program.as_ref(), stdin, stdout),
        }
    }

    /// Body of a forked child. Pipe bindings come first so that the
    /// command's own redirections override them.
    fn run_in_child(
        &mut self,
        command: &Command,
        program: Option<&ExternalProgram>,
        stdin: Option<&OwnedFd>,
        stdout: Option<&OwnedFd>,
    ) -> ! {
        // The Rust runtime ignores SIGPIPE and an ignored disposition survives
        // exec; a stage whose reader has exited must be killed by it.
        // SAFETY: installs the default disposition, no handler code runs.
        if let Err(e) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
            eprintln!("signal: {}", e);
            exit_child(1);
        }

        let bindings = [(stdin, libc::STDIN_FILENO), (stdout, libc::STDOUT_FILENO)];
        for (pipe_end, std_fd) in bindings {
            if let Some(fd) = pipe_end {
                if let Err(e) = dup2(fd.as_raw_fd(), std_fd) {
                    eprintln!("{}", ExecError::Dup(e));
                    exit_child(1);
                }
            }
        }
        if let Err(e) = redirect::apply(&command.redirections) {
            eprintln!("{}", e);
            exit_child(1);
        }

        match program {
            Some(program) => program.exec(),
            None => {
                let name = command.name().unwrap_or_default();
                let code = match self.builtins.lookup(name) {
                    Some(builtin) => {
                        let mut ctx = Context {
                            env: &mut self.env,
                            builtins: &self.builtins,
                        };
                        invoke_with_std_streams(builtin, command, &mut ctx)
                    }
                    None => STATUS_INTERNAL_FAILURE,
                };
                exit_child(code)
            }
        }
    }

    /// A Read-Eval-Print Loop reading lines with rustyline.
    ///
    /// Runs until end of input or until a builtin requests exit, and returns
    /// the status the session should end with.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;
        let history_file = self.config.history_file.clone();

        if let Some(path) = &history_file {
            match self.env.history.read_from(path) {
                Ok(count) => debug!(count, path = %path.display(), "history loaded"),
                Err(e) => debug!(path = %path.display(), "no history loaded: {}", e),
            }
            for line in self.env.history.entries() {
                rl.add_history_entry(line.as_str())?;
            }
        }

        let code = loop {
            match rl.readline(&self.config.prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                        self.env.history.push(line.as_str());
                    }
                    self.run_line(&line);
                    if let Some(code) = self.env.exit_request {
                        break code;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break self.env.last_status,
                Err(err) => return Err(err),
            }
        };

        if let Some(path) = &history_file {
            if let Err(e) = self.env.history.append_to(path) {
                warn!(path = %path.display(), "could not save history: {}", e);
            }
        }
        Ok(code)
    }
}

impl Default for Interpreter {
    /// An interpreter with the standard builtins and settings read from the
    /// process environment.
    fn default() -> Self {
        let env = Environment::new();
        let config = ShellConfig::from_env(&env);
        Self {
            env,
            builtins: BuiltinTable::default(),
            config,
        }
    }
}

/// Runs a builtin in the interpreter's own process: std fds are saved,
/// redirected, and restored once the builtin returns.
fn run_builtin(
    builtin: &dyn Builtin,
    command: &Command,
    env: &mut Environment,
    builtins: &BuiltinTable,
) -> ExitCode {
    let saved = match redirect::apply_saved(&command.redirections) {
        Ok(saved) => saved,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    let mut ctx = Context { env, builtins };
    let code = invoke_with_std_streams(builtin, command, &mut ctx);
    if let Err(e) = saved.restore() {
        warn!("{}", e);
    }
    code
}

/// Invokes a builtin on the process's standard streams, flushing them before
/// returning so nothing written lands after the streams are rebound.
fn invoke_with_std_streams(
    builtin: &dyn Builtin,
    command: &Command,
    ctx: &mut Context<'_>,
) -> ExitCode {
    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let code = {
        let mut io = Io {
            stdin: &mut stdin,
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        builtin.invoke(command, &mut io, ctx)
    };
    let _ = stdout.flush();
    let _ = stderr.flush();
    code
}

fn failure_status(error: &ExecError) -> ExitCode {
    match error {
        ExecError::Nul { .. } => STATUS_CANNOT_EXECUTE,
        _ => STATUS_INTERNAL_FAILURE,
    }
}

/// A pipe whose ends are closed on exec; children get their own copies
/// through dup2, which clears the flag.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), ExecError> {
    use nix::fcntl::OFlag;
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), ExecError> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    let (read, write) = nix::unistd::pipe().map_err(ExecError::Pipe)?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(ExecError::Pipe)?;
    }
    Ok((read, write))
}

#[cfg(test)]
mod tests {
    // Cases that fork live in tests/integration.rs, which drives the binary;
    // forking from the multithreaded test harness can inherit held locks.
    use super::*;
    use crate::error::ParseError;

    fn interpreter() -> Interpreter {
        Interpreter::new(BuiltinTable::default(), ShellConfig::default())
    }

    #[test]
    fn test_syntax_error_executes_nothing() {
        let mut sh = interpreter();
        sh.env_mut().last_status = 7;
        assert_eq!(
            sh.execute_line("touch marker | | cat"),
            Err(SyntaxError::Parse(ParseError::EmptySegment))
        );
        assert_eq!(sh.env().last_status, 7);
        assert_eq!(sh.run_line("touch marker |"), STATUS_SYNTAX_ERROR);
        assert_eq!(sh.env().last_status, STATUS_SYNTAX_ERROR);
    }

    #[test]
    fn test_strict_quotes() {
        let mut sh = Interpreter::new(
            BuiltinTable::default(),
            ShellConfig {
                strict_quotes: true,
                ..ShellConfig::default()
            },
        );
        assert!(matches!(
            sh.execute_line("echo 'oops"),
            Err(SyntaxError::Lex(LexError::UnterminatedQuote { quote: '\'' }))
        ));
        assert_eq!(
            sh.execute_line("echo oops\\"),
            Err(SyntaxError::Lex(LexError::DanglingEscape))
        );
    }

    #[test]
    fn test_blank_line_keeps_status() {
        let mut sh = interpreter();
        sh.env_mut().last_status = 1;
        assert_eq!(sh.run_line("   "), 1);
        assert_eq!(sh.execute_line(""), Ok(1));
    }

    #[test]
    fn test_parse_line() {
        let sh = interpreter();
        assert_eq!(sh.parse_line(" \t "), Ok(None));
        let pipeline = sh.parse_line("ls -l | wc -l > n.txt").unwrap().unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.to_string(), "ls -l | wc -l > n.txt");
    }

    #[test]
    fn test_limits_come_from_config() {
        let mut config = ShellConfig::default();
        config.limits.max_args = Some(1);
        let mut sh = Interpreter::new(BuiltinTable::default(), config);
        assert_eq!(
            sh.execute_line("echo hi"),
            Err(SyntaxError::Parse(ParseError::TooManyArguments { limit: 1 }))
        );
    }

    #[test]
    fn test_nul_argument_cannot_execute() {
        let command = Command {
            argv: vec!["printf".to_string(), "a\0b".to_string()],
            redirections: vec![],
        };
        let err = ExternalProgram::new(&command).unwrap_err();
        assert_eq!(failure_status(&err), STATUS_CANNOT_EXECUTE);
    }
}
