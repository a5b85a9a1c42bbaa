//! OS signal → control channel.
//!
//! The listener never touches supervisor state: it only sends a
//! [`ShutdownSignal`] and the supervisory loop decides what to do with it.

use std::fmt;
use std::io;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Terminate => f.write_str("terminate"),
        }
    }
}

/// Install the signal handlers and return the receiving end of the control channel.
///
/// Handlers are registered before this returns, so a Ctrl+C arriving while the
/// children are still being launched is queued instead of killing the supervisor.
/// Repeated signals after the first are dropped once the channel is full or closed.
pub fn listen() -> io::Result<mpsc::Receiver<ShutdownSignal>> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(_) = sigint.recv() => ShutdownSignal::Interrupt,
                    Some(_) = sigterm.recv() => ShutdownSignal::Terminate,
                    else => break,
                };
                if !forward(&tx, received) {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !forward(&tx, ShutdownSignal::Interrupt) {
                    break;
                }
            }
        });
    }

    Ok(rx)
}

/// Returns `false` once nobody is listening anymore.
fn forward(tx: &mpsc::Sender<ShutdownSignal>, signal: ShutdownSignal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => {
            tracing::info!("Received {} signal", signal);
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!("Shutdown already requested, ignoring {} signal", signal);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
