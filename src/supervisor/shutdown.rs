//! Shutdown coordinator — stops every tracked child exactly once.
//!
//! ## Policy
//! 1. graceful stop (SIGTERM to the process group) for every running child, in launch order
//! 2. wait for all of them against a single deadline (`now + grace period`)
//! 3. SIGKILL whatever is still running, without waiting further
//!
//! Output keeps streaming to the console while the children wind down.
//!
//! Sending every graceful request up front bounds the total latency by one grace
//! period no matter how many children there are.

use std::process::ExitStatus;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ExitReport, ManagedProcess, OutputLine, Role, ShutdownSignal, Supervisor};
use crate::console::Console;

/// Why the session is ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The user (or the OS) asked the supervisor to stop.
    Signal(ShutdownSignal),
    /// A child exited on its own.
    ChildExited(ExitReport),
    /// A child could not be started after another one was already live.
    LaunchFailed { role: Role, message: String },
}

impl ShutdownReason {
    /// Exit code of the supervisor itself.
    ///
    /// A signal is a clean shutdown (0). An unexpected child exit propagates the
    /// child's non-zero code; a zero code or a signal death still counts as a failure (1).
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Signal(_) => 0,
            Self::ChildExited(exit) => exit
                .code
                .and_then(|code| u8::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1),
            Self::LaunchFailed { .. } => 1,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Signal(signal) => format!("Received {} signal", signal),
            Self::ChildExited(exit) => format!("A server process exited unexpectedly: {}", exit),
            Self::LaunchFailed { role, message } => format!("Failed to start {}: {}", role, message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Had already exited before shutdown began.
    AlreadyExited,
    /// Exited within the grace period.
    Graceful,
    /// Still running after the grace period and was killed.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStop {
    pub role: Role,
    pub pid: u32,
    pub outcome: StopOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// One entry per tracked process, in launch order.
    pub stops: Vec<ProcessStop>,
    pub exit_code: u8,
}

impl ShutdownReport {
    pub fn outcome(&self, role: Role) -> Option<StopOutcome> {
        self.stops.iter().find(|s| s.role == role).map(|s| s.outcome)
    }
}

impl Supervisor {
    /// Stop every tracked child and report how each one ended.
    ///
    /// Only the first call does anything; later calls log and return `None`.
    pub async fn shutdown_all(&mut self, reason: ShutdownReason) -> Option<ShutdownReport> {
        if self.shutdown_started {
            tracing::debug!("Shutdown already performed, ignoring: {}", reason.describe());
            return None;
        }
        self.shutdown_started = true;

        match &reason {
            ShutdownReason::Signal(_) => tracing::info!("{}", reason.describe()),
            _ => {
                tracing::warn!("{}", reason.describe());
                self.console.blank();
                self.console.status(format!("⚠️  {}", reason.describe()));
            }
        }
        self.console.blank();
        self.console.status("🛑 Shutting down servers...");

        // 1단계: 살아있는 모든 프로세스에 종료 요청
        let mut outcomes = Vec::with_capacity(self.processes.len());
        for process in self.processes.iter_mut() {
            if process.try_reap().is_some() {
                process.stop_leftovers();
                outcomes.push(Some(StopOutcome::AlreadyExited));
                continue;
            }
            if let Err(e) = process.request_stop() {
                tracing::warn!("Failed to request stop of {} (pid {}): {}", process.role(), process.pid(), e);
            }
            outcomes.push(None);
        }

        // 2단계: 하나의 데드라인으로 대기, 이후 강제 종료
        let deadline = Instant::now() + self.grace_period;
        for (process, outcome) in self.processes.iter_mut().zip(outcomes.iter_mut()) {
            if outcome.is_some() {
                continue;
            }
            if wait_printing_output(process, deadline, &mut self.output_rx, &self.console)
                .await
                .is_some()
            {
                *outcome = Some(StopOutcome::Graceful);
                continue;
            }
            tracing::warn!(
                "{} (pid {}) did not stop within {:?}, killing it",
                process.role(),
                process.pid(),
                self.grace_period
            );
            if let Err(e) = process.force_kill() {
                tracing::error!("Failed to kill {} (pid {}): {}", process.role(), process.pid(), e);
            }
            *outcome = Some(StopOutcome::Forced);
        }

        // 종료 중 마지막 출력까지 전달
        self.flush_pending_output().await;

        let stops = self
            .processes
            .iter()
            .zip(outcomes)
            .map(|(process, outcome)| ProcessStop {
                role: process.role(),
                pid: process.pid(),
                outcome: outcome.unwrap_or(StopOutcome::Forced),
            })
            .collect();

        self.console.status("✅ All servers stopped.");

        let exit_code = reason.exit_code();
        Some(ShutdownReport {
            reason,
            stops,
            exit_code,
        })
    }
}

/// Wait for `process` until `deadline`, printing output lines as they arrive.
async fn wait_printing_output(
    process: &mut ManagedProcess,
    deadline: Instant,
    output: &mut mpsc::Receiver<OutputLine>,
    console: &Console,
) -> Option<ExitStatus> {
    let wait = process.wait_until(deadline);
    tokio::pin!(wait);
    loop {
        tokio::select! {
            biased;
            status = &mut wait => return status,
            Some(line) = output.recv() => console.child_line(&line),
        }
    }
}
