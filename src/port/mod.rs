//! Port allocation for the backend / frontend pair.
//!
//! A port is "free" when a fresh TCP socket can be bound to it on the loopback
//! interface. The probe socket is closed right away, so nothing is reserved: another
//! process may still grab the port between the probe and the child's own bind.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};

use crate::supervisor::SupervisorError;

/// Default number of ports tried after the preferred one.
pub const DEFAULT_MAX_ATTEMPTS: u16 = 100;

/// Resolved ports for one run. Fixed once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub backend: u16,
    pub frontend: u16,
}

/// Check whether `port` can be bound on 127.0.0.1 right now.
///
/// `SO_REUSEADDR` is left off on purpose so that an existing listener on the
/// port always makes the bind fail.
pub fn is_port_available(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let socket = match Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("Failed to create probe socket: {}", e);
            return false;
        }
    };
    let free = socket.bind(&addr.into()).and_then(|_| socket.listen(1)).is_ok();
    tracing::trace!("Probe 127.0.0.1:{} → {}", port, if free { "free" } else { "in use" });
    free
}

/// Return `preferred` if it is free, otherwise the first free port among
/// `preferred + 1 ..= preferred + max_attempts`.
pub fn resolve_port(preferred: u16, max_attempts: u16) -> Result<u16, SupervisorError> {
    resolve_port_with(preferred, max_attempts, is_port_available)
}

/// Same scan as [`resolve_port`], with the availability check supplied by the caller.
pub fn resolve_port_with<F>(
    preferred: u16,
    max_attempts: u16,
    mut probe: F,
) -> Result<u16, SupervisorError>
where
    F: FnMut(u16) -> bool,
{
    if preferred == 0 {
        return Err(SupervisorError::InvalidPort(preferred));
    }

    for offset in 0..=max_attempts {
        // 65535를 넘으면 중단 (wraparound 없음)
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        if probe(port) {
            if offset > 0 {
                tracing::info!("Port {} is in use, using {} instead", preferred, port);
            }
            return Ok(port);
        }
        tracing::debug!("Port {} is in use", port);
    }

    Err(SupervisorError::PortExhaustion {
        preferred,
        attempts: max_attempts,
    })
}
