//! Process execution in the isolated namespace
//!
//! The child inherits the network namespace of the thread that spawns it, so
//! [`CommandExecutor`] must run on the thread that entered the target
//! namespace. While the child runs, an interrupt listener races the wait:
//! whichever finishes first decides the outcome.

use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use macns_core::{CallLog, Error, ExitInfo, Result, Termination};

/// A command line split on whitespace
///
/// There is no shell quoting: an argument cannot contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Split a command line into program and arguments
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an empty command
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::invalid_config("command cannot be empty"))?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program name as given
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve the program through `PATH`
    ///
    /// # Errors
    /// Returns [`Error::Lookup`] if no executable is found
    pub fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| Error::Lookup {
            program: self.program.clone(),
            message: e.to_string(),
        })
    }
}

/// Execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Nothing started yet
    Idle,
    /// Resolving and spawning the child
    Starting,
    /// Child is running
    Running,
    /// Child exited on its own
    Completed,
    /// Child was killed after an interrupt
    Killed,
    /// Lookup or spawn failed
    StartFailed,
}

impl ExecState {
    /// Whether no further transition can happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Killed | Self::StartFailed)
    }
}

/// Listens for SIGINT and SIGTERM
///
/// Registering replaces the default disposition, so the process is not
/// killed by the signal and gets the chance to clean up.
#[derive(Debug)]
pub struct InterruptListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl InterruptListener {
    /// Register the listeners
    ///
    /// # Errors
    /// Returns [`Error::Signal`] if a listener cannot be registered
    pub fn new() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(|source| Error::Signal { source })?,
            terminate: signal(SignalKind::terminate()).map_err(|source| Error::Signal { source })?,
        })
    }

    /// Wait for the first interrupt or termination request and return its number
    pub async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::SIGINT as i32,
            _ = self.terminate.recv() => Signal::SIGTERM as i32,
        }
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Interrupted(i32),
}

/// Runs the user command and supervises it until it exits or is interrupted
#[derive(Debug)]
pub struct CommandExecutor {
    state: ExecState,
    log: Option<CallLog>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Create an idle executor
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ExecState::Idle,
            log: None,
        }
    }

    /// Record spawn and kill operations into a shared log
    #[must_use]
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ExecState {
        self.state
    }

    fn transition(&mut self, next: ExecState) {
        debug!(from = ?self.state, to = ?next, "Executor state change");
        self.state = next;
    }

    fn record(&self, entry: String) {
        if let Some(log) = &self.log {
            log.record(entry);
        }
    }

    /// Run `command`, killing it on SIGINT/SIGTERM
    ///
    /// `restore` runs before the kill so cleanup continues from the
    /// original namespace.
    pub async fn run<R>(&mut self, command: &str, restore: R) -> Result<ExitInfo>
    where
        R: FnOnce() -> Result<()>,
    {
        let mut listener = InterruptListener::new()?;
        self.run_until(command, listener.recv(), restore).await
    }

    /// Run `command` until it exits or `interrupt` resolves with a signal number
    pub async fn run_until<F, R>(
        &mut self,
        command: &str,
        interrupt: F,
        restore: R,
    ) -> Result<ExitInfo>
    where
        F: Future<Output = i32>,
        R: FnOnce() -> Result<()>,
    {
        if self.state != ExecState::Idle {
            return Err(Error::invalid_config("executor already used"));
        }
        self.transition(ExecState::Starting);

        tokio::pin!(interrupt);
        let pending = tokio::select! {
            biased;
            sig = &mut interrupt => Some(sig),
            () = std::future::ready(()) => None,
        };
        if let Some(signal) = pending {
            self.transition(ExecState::Killed);
            warn!(signal, "Interrupt received before start, command not run");
            return Err(Error::Interrupted { signal });
        }

        let mut child = match self.spawn(command) {
            Ok(child) => child,
            Err(e) => {
                self.transition(ExecState::StartFailed);
                return Err(e);
            }
        };

        // A freshly spawned child always has an id
        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id().map_or(0, |id| id as i32);
        self.transition(ExecState::Running);
        info!(pid, "Command started");

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            sig = &mut interrupt => Outcome::Interrupted(sig),
        };

        match outcome {
            Outcome::Exited(status) => self.finish(pid, status),
            Outcome::Interrupted(sig) => {
                self.transition(ExecState::Killed);
                warn!(signal = sig, pid, "Interrupt received, stopping command");

                if let Err(e) = restore() {
                    error!(error = %e, "Could not restore original namespace before kill");
                }

                self.record(format!("exec:kill {pid}"));
                match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => warn!(pid, error = %e, "Could not kill process group"),
                }

                child.wait().await.map_err(|source| Error::Wait { source })?;
                let info = ExitInfo {
                    pid,
                    termination: Termination::Killed(sig),
                };
                info!(%info, "Command stopped");
                Ok(info)
            }
        }
    }

    fn finish(
        &mut self,
        pid: i32,
        status: std::io::Result<std::process::ExitStatus>,
    ) -> Result<ExitInfo> {
        self.transition(ExecState::Completed);
        let status = status.map_err(|source| {
            error!(pid, error = %source, "Lost track of command");
            Error::Wait { source }
        })?;

        let termination = status
            .code()
            .map(Termination::Exited)
            .or_else(|| status.signal().map(Termination::Signaled))
            .unwrap_or(Termination::Exited(-1));
        let info = ExitInfo { pid, termination };
        info!(%info, "Command finished");
        Ok(info)
    }

    fn spawn(&self, command: &str) -> Result<tokio::process::Child> {
        let line = CommandLine::parse(command)?;
        let bin = line.resolve()?;

        debug!(
            "Going to run `{} ( {} ) {}`",
            line.program(),
            bin.display(),
            line.args().join(" ")
        );

        let child = Command::new(&bin)
            .arg0(line.program())
            .args(line.args())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: bin.display().to_string(),
                source,
            })?;

        self.record(format!("exec:spawn {}", line.program()));
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_whitespace() {
        let line = CommandLine::parse("  ip   route show ").unwrap();
        assert_eq!(line.program(), "ip");
        assert_eq!(line.args(), ["route", "show"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(CommandLine::parse("").is_err());
        assert!(CommandLine::parse(" \t ").is_err());
    }

    #[test]
    fn test_resolve_missing_program() {
        let line = CommandLine::parse("macns-no-such-binary-xyz").unwrap();
        assert!(matches!(line.resolve(), Err(Error::Lookup { .. })));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecState::Idle.is_terminal());
        assert!(!ExecState::Running.is_terminal());
        assert!(ExecState::Completed.is_terminal());
        assert!(ExecState::Killed.is_terminal());
        assert!(ExecState::StartFailed.is_terminal());
    }

    #[tokio::test]
    async fn test_completed() {
        let mut executor = CommandExecutor::new();
        let info = executor
            .run_until("true", std::future::pending(), || Ok(()))
            .await
            .unwrap();

        assert_eq!(executor.state(), ExecState::Completed);
        assert!(info.success());
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let mut executor = CommandExecutor::new();
        let info = executor
            .run_until("false", std::future::pending(), || Ok(()))
            .await
            .unwrap();

        assert_eq!(info.termination, Termination::Exited(1));
        assert_eq!(info.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_start_failed() {
        let mut executor = CommandExecutor::new();
        let result = executor
            .run_until("macns-no-such-binary-xyz", std::future::pending(), || Ok(()))
            .await;

        assert!(matches!(result, Err(Error::Lookup { .. })));
        assert_eq!(executor.state(), ExecState::StartFailed);
    }

    #[tokio::test]
    async fn test_executor_single_use() {
        let mut executor = CommandExecutor::new();
        executor
            .run_until("true", std::future::pending(), || Ok(()))
            .await
            .unwrap();

        let again = executor
            .run_until("true", std::future::pending(), || Ok(()))
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_interrupt_restores_before_kill() {
        let log = CallLog::new();
        let restore_log = log.clone();
        let mut executor = CommandExecutor::new().with_log(log.clone());

        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Signal::SIGINT as i32
        };
        let info = executor
            .run_until("sleep 30", interrupt, move || {
                restore_log.record("restore");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(executor.state(), ExecState::Killed);
        assert_eq!(info.termination, Termination::Killed(2));
        assert_eq!(info.exit_code(), 130);

        let spawn = log.position("exec:spawn").unwrap();
        let restore = log.position("restore").unwrap();
        let kill = log.position("exec:kill").unwrap();
        assert!(spawn < restore);
        assert!(restore < kill);

        // Reaped: the pid no longer exists
        let alive = nix::sys::signal::kill(Pid::from_raw(info.pid), None);
        assert_eq!(alive, Err(Errno::ESRCH));
    }

    #[tokio::test]
    async fn test_interrupt_before_start_skips_command() {
        let log = CallLog::new();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let mut executor = CommandExecutor::new().with_log(log.clone());

        let result = executor
            .run_until(
                &format!("touch {}", marker.display()),
                std::future::ready(2),
                || Ok(()),
            )
            .await;

        assert!(matches!(result, Err(Error::Interrupted { signal: 2 })));
        assert_eq!(executor.state(), ExecState::Killed);
        assert_eq!(log.count("exec:spawn"), 0);
        assert!(!marker.exists());
    }

    #[test]
    fn test_wait_failure_is_terminal() {
        let mut executor = CommandExecutor::new();
        executor.transition(ExecState::Running);

        let result = executor.finish(42, Err(std::io::Error::other("gone")));
        assert!(matches!(result, Err(Error::Wait { .. })));
        assert!(executor.state().is_terminal());
    }

    fn is_gone(pid: i32) -> bool {
        // A zombie waiting for init to reap it counts as gone
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn test_interrupt_kills_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = dir.path().join("spawn.sh");
        std::fs::write(
            &script,
            format!("sleep 30 &\necho $! > {}\nwait\n", pid_file.display()),
        )
        .unwrap();

        let watched = pid_file.clone();
        let interrupt = async move {
            loop {
                if let Ok(pid) = std::fs::read_to_string(&watched)
                    && !pid.trim().is_empty()
                {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Signal::SIGTERM as i32
        };

        let mut executor = CommandExecutor::new();
        let info = executor
            .run_until(&format!("sh {}", script.display()), interrupt, || Ok(()))
            .await
            .unwrap();
        assert_eq!(info.termination, Termination::Killed(15));

        let grandchild: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..100 {
            if is_gone(info.pid) && is_gone(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(gone, "process group survived the interrupt");
    }
}
