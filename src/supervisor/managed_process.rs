//! Managed Process - one long-running child with captured output
//!
//! Each child gets:
//! - its own process group, so stop signals reach the whole tree
//! - one pump task per output stream, forwarding lines into the supervisor's channel
//! - an exit status recorded once, the first time the supervisor sees it exit

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::SupervisorError;
use crate::utils::detach_process_group;

// ─── Roles & Output ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Backend,
    Frontend,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Backend => "Backend",
            Self::Frontend => "Frontend",
        }
    }

    /// Console prefix for lines coming from this child.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Backend => "🖥️  [backend]",
            Self::Frontend => "🌐 [frontend]",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single line of output from a managed child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub role: Role,
    pub stream: OutputStream,
    /// Line content without the trailing newline
    pub content: String,
}

// ─── Launch & Exit ───────────────────────────────────────────

/// Everything needed to start one child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub role: Role,
    pub working_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    /// Merged over the inherited environment; overlay wins on collision.
    pub env: BTreeMap<String, String>,
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub role: Role,
    pub pid: u32,
    /// Exit code, absent when the child was killed by a signal
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    fn new(role: Role, pid: u32, status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            role,
            pid,
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "{} exited with code {}", self.role, code),
            (None, Some(sig)) => write!(f, "{} was killed by signal {}", self.role, sig),
            (None, None) => write!(f, "{} exited", self.role),
        }
    }
}

// ─── Managed Process ─────────────────────────────────────────

/// A child process owned by the supervisor.
pub struct ManagedProcess {
    role: Role,
    pid: u32,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    child: Child,
    exit_status: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Spawn the child and start pumping its stdout/stderr into `sink`.
    ///
    /// Returns as soon as the OS process exists; readiness is not awaited.
    /// Must be called from inside a tokio runtime.
    pub fn spawn(spec: LaunchSpec, sink: mpsc::Sender<OutputLine>) -> Result<Self, SupervisorError> {
        let LaunchSpec {
            role,
            working_dir,
            program,
            args,
            env,
        } = spec;

        if !working_dir.is_dir() {
            return Err(SupervisorError::Spawn {
                role,
                program,
                reason: format!("working directory {} does not exist", working_dir.display()),
            });
        }

        let mut cmd = TokioCommand::new(&program);
        cmd.args(&args)
            .current_dir(&working_dir)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        detach_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            role,
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            role,
            program: program.clone(),
            reason: "process exited before its PID could be read".to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, role, OutputStream::Stdout, sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, role, OutputStream::Stderr, sink);
        }

        tracing::info!(
            "Spawned {} (pid {}): {} {} in {}",
            role,
            pid,
            program,
            args.join(" "),
            working_dir.display()
        );

        Ok(Self {
            role,
            pid,
            program,
            args,
            env,
            child,
            exit_status: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exit_status.map(|s| ExitReport::new(self.role, self.pid, s))
    }

    pub fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Non-blocking exit check. Records the status the first time it is seen.
    pub fn try_reap(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!("{} (pid {}) exited with {}", self.role, self.pid, status);
                self.exit_status = Some(status);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to poll {} (pid {}): {}", self.role, self.pid, e),
        }
        self.exit_status
    }

    /// Wait for the child to exit, giving up at `deadline`.
    pub async fn wait_until(&mut self, deadline: Instant) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("{} (pid {}) exited with {}", self.role, self.pid, status);
                self.exit_status = Some(status);
            }
            Ok(Err(e)) => tracing::warn!("Failed to wait for {} (pid {}): {}", self.role, self.pid, e),
            Err(_) => {}
        }
        self.exit_status
    }

    /// Ask the child's process group to terminate (SIGTERM).
    #[cfg(unix)]
    pub fn request_stop(&mut self) -> io::Result<()> {
        tracing::info!("Sending TERM to {} (pid {})", self.role, self.pid);
        signal_group(self.pid, nix::sys::signal::Signal::SIGTERM)
    }

    /// No graceful stop on Windows; fall back to terminating the child.
    #[cfg(not(unix))]
    pub fn request_stop(&mut self) -> io::Result<()> {
        tracing::info!("Terminating {} (pid {})", self.role, self.pid);
        self.child.start_kill()
    }

    /// Kill the child's process group (SIGKILL) without waiting for it.
    pub fn force_kill(&mut self) -> io::Result<()> {
        tracing::warn!("Killing {} (pid {})", self.role, self.pid);
        #[cfg(unix)]
        signal_group(self.pid, nix::sys::signal::Signal::SIGKILL)?;
        #[cfg(not(unix))]
        self.child.start_kill()?;
        self.try_reap();
        Ok(())
    }

    /// Terminate processes left in the group after the leader already exited.
    ///
    /// The kernel keeps a pid reserved while it is still in use as a process group id,
    /// so this can only reach descendants of this child.
    pub fn stop_leftovers(&mut self) {
        #[cfg(unix)]
        {
            if let Err(e) = signal_group(self.pid, nix::sys::signal::Signal::SIGTERM) {
                tracing::debug!("No leftovers for {} (pid {}): {}", self.role, self.pid, e);
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {} out of range", pid)))?;
    match killpg(Pid::from_raw(pgid), signal) {
        // 이미 종료된 그룹
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

/// Forward every line of `reader` to `sink` until EOF or the receiver goes away.
///
/// Lines are read as bytes so non-UTF-8 output is shown lossily instead of ending the pump.
fn pump_lines<R>(reader: R, role: Role, stream: OutputStream, sink: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let content = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    let line = OutputLine { role, stream, content };
                    if sink.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("{} {:?} read error: {}", role, stream, e);
                    break;
                }
            }
        }
    });
}

// ─── Tests ───────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(role: Role, script: &str) -> LaunchSpec {
        LaunchSpec {
            role,
            working_dir: std::env::temp_dir(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
        }
    }

    async fn collect(rx: &mut mpsc::Receiver<OutputLine>, n: usize) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        while lines.len() < n {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(line)) => lines.push(line),
                _ => break,
            }
        }
        lines
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::Backend.to_string(), "backend");
        assert_eq!(Role::Frontend.title(), "Frontend");
        assert!(Role::Frontend.prefix().ends_with("[frontend]"));
    }

    #[test]
    fn exit_report_display() {
        let report = ExitReport { role: Role::Backend, pid: 1, code: Some(7), signal: None };
        assert_eq!(report.to_string(), "backend exited with code 7");
        assert!(!report.success());

        let killed = ExitReport { role: Role::Frontend, pid: 2, code: None, signal: Some(9) };
        assert_eq!(killed.to_string(), "frontend was killed by signal 9");
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_pumped_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut proc = ManagedProcess::spawn(
            sh(Role::Backend, "echo one; echo two; echo oops >&2"),
            tx,
        )
        .unwrap();
        assert!(proc.pid() > 0);

        let lines = collect(&mut rx, 3).await;
        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(stdout, vec!["one", "two"]);
        assert!(lines
            .iter()
            .any(|l| l.stream == OutputStream::Stderr && l.content == "oops"));
        assert!(lines.iter().all(|l| l.role == Role::Backend));

        let status = proc.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert!(status.unwrap().success());
    }

    #[tokio::test]
    async fn env_overlay_reaches_child() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut spec = sh(Role::Backend, "echo \"port=$PORT home_set=${HOME:+yes}\"");
        spec.env.insert("PORT".into(), "3002".into());
        let proc = ManagedProcess::spawn(spec, tx).unwrap();
        assert_eq!(proc.env()["PORT"], "3002");

        let lines = collect(&mut rx, 1).await;
        // overlay applied, inherited environment kept
        assert_eq!(lines[0].content, "port=3002 home_set=yes");
    }

    #[tokio::test]
    async fn exit_code_is_recorded_once() {
        let (tx, _rx) = mpsc::channel(16);
        let mut proc = ManagedProcess::spawn(sh(Role::Backend, "exit 7"), tx).unwrap();
        assert!(proc.is_running());

        proc.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert!(!proc.is_running());
        let report = proc.exit_report().unwrap();
        assert_eq!(report.code, Some(7));
        assert_eq!(proc.try_reap().and_then(|s| s.code()), Some(7));
    }

    #[tokio::test]
    async fn request_stop_terminates_group() {
        let (tx, _rx) = mpsc::channel(16);
        let mut proc = ManagedProcess::spawn(sh(Role::Frontend, "sleep 30 & wait"), tx).unwrap();
        proc.request_stop().unwrap();
        let status = proc.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert!(status.is_some(), "child should stop after TERM");
        assert!(proc.exit_report().unwrap().signal.is_some() || !status.unwrap().success());
    }

    #[tokio::test]
    async fn force_kill_ignores_term_trap() {
        let (tx, _rx) = mpsc::channel(16);
        let mut proc = ManagedProcess::spawn(sh(Role::Backend, "trap '' TERM; sleep 30"), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        proc.request_stop().unwrap();
        assert!(proc
            .wait_until(Instant::now() + Duration::from_millis(300))
            .await
            .is_none());

        proc.force_kill().unwrap();
        let status = proc.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert!(status.is_some());
        assert_eq!(proc.exit_report().unwrap().signal, Some(9));
    }

    #[tokio::test]
    async fn missing_working_dir_is_spawn_error() {
        let (tx, _rx) = mpsc::channel(16);
        let mut spec = sh(Role::Frontend, "true");
        spec.working_dir = PathBuf::from("/definitely/not/here");
        let err = ManagedProcess::spawn(spec, tx).err().unwrap();
        assert!(matches!(err, SupervisorError::Spawn { role: Role::Frontend, .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let (tx, _rx) = mpsc::channel(16);
        let mut spec = sh(Role::Backend, "");
        spec.program = "no-such-dev-server".into();
        let err = ManagedProcess::spawn(spec, tx).err().unwrap();
        assert_eq!(err.error_code(), "SPAWN_FAILED");
    }
}
