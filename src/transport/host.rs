//! Native host process management.
//!
//! A [`HostLauncher`] produces a fresh [`NativeChannel`] for every selector
//! launch. [`ProcessLauncher`] spawns the native bridge application with
//! piped stdio, the same way the browser starts a native messaging host.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::options::SelectorOptions;

use super::NativeChannel;

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards a native host process and ensures it is killed when dropped.
pub struct ProcessGuard {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    /// Creates a new process guard.
    #[must_use]
    pub fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Waits up to `grace` for the process to exit, then kills it.
    pub async fn wait_or_kill(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, %status, "Native host exited");
            }
            Ok(Err(e)) => {
                debug!(pid = self.pid, error = %e, "Failed to wait for native host");
            }
            Err(_) => {
                debug!(pid = self.pid, grace_ms = grace.as_millis() as u64, "Killing native host");
                if let Err(e) = child.kill().await {
                    debug!(pid = self.pid, error = %e, "Failed to kill native host");
                }
            }
        }

        info!(pid = self.pid, "Native host terminated");
    }

    /// Returns the process ID.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Debug for ProcessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGuard")
            .field("pid", &self.pid)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// HostLauncher
// ============================================================================

/// Starts or attaches to a native host.
///
/// Each call must return a new channel; a terminated channel is never reused.
pub trait HostLauncher: Send + Sync {
    /// Launches a host for one selector session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchFailed`] if the host cannot be started.
    fn launch(&self, options: &SelectorOptions) -> Result<NativeChannel>;
}

// ============================================================================
// ProcessLauncher
// ============================================================================

/// Spawns the native bridge application as a child process.
///
/// Without an explicit program, the option's bridge application name is
/// resolved through `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    /// Explicit program path.
    program: Option<PathBuf>,
    /// Extra command-line arguments.
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Creates a launcher that uses the configured bridge name.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit program path.
    #[inline]
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Adds a command-line argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the program that will be spawned for `options`.
    #[must_use]
    pub fn program(&self, options: &SelectorOptions) -> PathBuf {
        self.program
            .clone()
            .unwrap_or_else(|| PathBuf::from(&options.bridge_application_name))
    }
}

impl HostLauncher for ProcessLauncher {
    fn launch(&self, options: &SelectorOptions) -> Result<NativeChannel> {
        let program = self.program(options);

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::launch_failed(format!("{}: {e}", program.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::launch_failed("Native host stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::launch_failed("Native host stdout unavailable"))?;

        let guard = ProcessGuard::new(child);
        info!(pid = guard.pid(), program = %program.display(), "Native host spawned");

        Ok(NativeChannel::new(stdout, stdin, Some(guard)))
    }
}

// ============================================================================
// Tests
// ============================================================================
