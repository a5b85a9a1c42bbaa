//! Human-facing console output: status lines, the startup banner and the
//! role-prefixed lines streamed from both children.
//!
//! Diagnostics go through `tracing` (stderr); this is what the developer reads.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::port::PortAssignment;
use crate::supervisor::{OutputLine, Role};

const RULE_WIDTH: usize = 50;

#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

/// In-memory sink returned by [`Console::in_memory`].
#[derive(Clone, Default)]
pub struct ConsoleBuffer(Arc<Mutex<Vec<u8>>>);

impl ConsoleBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for ConsoleBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn in_memory() -> (Self, ConsoleBuffer) {
        let buffer = ConsoleBuffer::default();
        (Self::new(Box::new(buffer.clone())), buffer)
    }

    /// Write one whole line; the lock keeps lines from two sources from tearing.
    fn write_line(&self, line: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::debug!("Console write failed: {}", e);
        }
    }

    pub fn status(&self, line: impl AsRef<str>) {
        self.write_line(line.as_ref());
    }

    pub fn blank(&self) {
        self.write_line("");
    }

    pub fn error(&self, line: impl AsRef<str>) {
        self.write_line(&format!("❌ {}", line.as_ref()));
    }

    pub fn child_line(&self, line: &OutputLine) {
        self.write_line(&format!("{} {}", line.role.prefix(), line.content));
    }

    pub fn banner(&self, ports: &PortAssignment) {
        let rule = "=".repeat(RULE_WIDTH);
        self.blank();
        self.write_line(&rule);
        self.write_line("✅ Both servers are running!");
        self.write_line(&format!("   Frontend: http://localhost:{}", ports.frontend));
        self.write_line(&format!("   Backend:  http://localhost:{}", ports.backend));
        self.write_line(&rule);
        self.blank();
        self.write_line("Press Ctrl+C to stop both servers.");
        self.blank();
    }

    pub fn launched(&self, role: Role, pid: u32) {
        self.write_line(&format!("   {} running (PID: {})", role.title(), pid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::OutputStream;

    #[test]
    fn child_lines_are_prefixed_by_role() {
        let (console, buf) = Console::in_memory();
        console.child_line(&OutputLine {
            role: Role::Backend,
            stream: OutputStream::Stdout,
            content: "listening on 3002".into(),
        });
        console.child_line(&OutputLine {
            role: Role::Frontend,
            stream: OutputStream::Stderr,
            content: "VITE ready".into(),
        });
        assert_eq!(
            buf.contents(),
            "🖥️  [backend] listening on 3002\n🌐 [frontend] VITE ready\n"
        );
    }

    #[test]
    fn banner_shows_resolved_ports() {
        let (console, buf) = Console::in_memory();
        console.banner(&PortAssignment { backend: 3002, frontend: 5173 });
        let out = buf.contents();
        assert!(out.contains("Frontend: http://localhost:5173"));
        assert!(out.contains("Backend:  http://localhost:3002"));
        assert!(out.contains("Press Ctrl+C"));
    }

    #[test]
    fn clones_share_the_sink() {
        let (console, buf) = Console::in_memory();
        let other = console.clone();
        console.status("one");
        other.error("two");
        assert_eq!(buf.contents(), "one\n❌ two\n");
    }
}
