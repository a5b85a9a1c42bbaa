pub mod error;
pub mod managed_process;
pub mod shutdown;
pub mod signal;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::console::Console;

pub use error::SupervisorError;
pub use managed_process::{ExitReport, LaunchSpec, ManagedProcess, OutputLine, OutputStream, Role};
pub use shutdown::{ProcessStop, ShutdownReason, ShutdownReport, StopOutcome};
pub use signal::ShutdownSignal;

/// Capacity of the shared output channel fed by the pump tasks.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// How often the supervisory loop checks whether a child has exited.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the children of one development session.
///
/// Processes are kept in launch order; that order decides which exit wins when
/// several are noticed in the same liveness check, and the order of shutdown.
pub struct Supervisor {
    processes: Vec<ManagedProcess>,
    output_tx: mpsc::Sender<OutputLine>,
    output_rx: mpsc::Receiver<OutputLine>,
    console: Console,
    grace_period: Duration,
    shutdown_started: bool,
}

impl Supervisor {
    pub fn new(console: Console, grace_period: Duration) -> Self {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        Self {
            processes: Vec::new(),
            output_tx,
            output_rx,
            console,
            grace_period,
            shutdown_started: false,
        }
    }

    /// Tracked processes, in launch order.
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    pub fn process(&self, role: Role) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.role() == role)
    }

    /// Start a child and begin tracking it. Does not wait for it to become ready.
    ///
    /// Only one process per role may ever be launched; there is no restart.
    pub fn launch(&mut self, spec: LaunchSpec) -> Result<&ManagedProcess, SupervisorError> {
        if self.shutdown_started {
            return Err(SupervisorError::Internal(anyhow::anyhow!(
                "cannot launch {} during shutdown",
                spec.role
            )));
        }
        if self.process(spec.role).is_some() {
            return Err(SupervisorError::AlreadyLaunched(spec.role));
        }

        let role = spec.role;
        let process = ManagedProcess::spawn(spec, self.output_tx.clone())?;
        tracing::debug!(
            "Tracking {} as entry #{}: {}",
            role,
            self.processes.len(),
            process.command_line()
        );
        self.processes.push(process);
        Ok(&self.processes[self.processes.len() - 1])
    }

    /// Print every output line that has already arrived, without waiting.
    /// Returns the number of lines written.
    pub fn poll_output(&mut self) -> usize {
        let mut written = 0;
        while let Ok(line) = self.output_rx.try_recv() {
            self.console.child_line(&line);
            written += 1;
        }
        written
    }

    /// Check every running child for exit, in launch order.
    ///
    /// All exits seen in this pass are recorded; the first one is returned.
    pub fn poll_liveness(&mut self) -> Option<ExitReport> {
        let mut first = None;
        for process in self.processes.iter_mut().filter(|p| p.is_running()) {
            if process.try_reap().is_some() && first.is_none() {
                first = process.exit_report();
            }
        }
        first
    }

    /// The supervisory loop: stream output and watch liveness until a child exits
    /// or a shutdown signal arrives.
    pub async fn run(&mut self, control: &mut mpsc::Receiver<ShutdownSignal>) -> ShutdownReason {
        let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                Some(signal) = control.recv() => {
                    self.poll_output();
                    return ShutdownReason::Signal(signal);
                }
                Some(line) = self.output_rx.recv() => {
                    self.console.child_line(&line);
                }
                _ = ticker.tick() => {
                    self.poll_output();
                    if let Some(exit) = self.poll_liveness() {
                        // 종료 직전 출력까지 마저 출력
                        self.flush_pending_output().await;
                        return ShutdownReason::ChildExited(exit);
                    }
                }
            }
        }
    }

    /// Give the pumps of exited children a moment to deliver their last lines.
    pub(crate) async fn flush_pending_output(&mut self) {
        let deadline = tokio::time::Instant::now() + LIVENESS_INTERVAL;
        while let Ok(Some(line)) = tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
            self.console.child_line(&line);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_started
    }
}
