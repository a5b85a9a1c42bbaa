//! Supervisor 전용 에러 타입 — 에러 종류를 구분하여 main에서
//! 적절한 프로세스 종료 코드를 반환할 수 있게 합니다.

use super::Role;

/// Errors raised before or while the process pair is being brought up.
///
/// Once both children are live, failures no longer surface as errors: they become a
/// [`ShutdownReason`](super::ShutdownReason) and go through the shutdown coordinator.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to install {name} dependencies (exit code {code:?}):\n{diagnostics}")]
    SetupFailure {
        name: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("No free port found starting at {preferred} ({attempts} additional ports tried)")]
    PortExhaustion { preferred: u16, attempts: u16 },

    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("A {0} process has already been launched")]
    AlreadyLaunched(Role),

    #[error("Failed to spawn {role} process '{program}': {reason}")]
    Spawn {
        role: Role,
        program: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// 프로세스 종료 코드 매핑
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidConfig(_) | Self::InvalidPort(_) => 2,
            Self::PortExhaustion { .. } => 3,
            Self::SetupFailure { .. } => 1,
            Self::AlreadyLaunched(_) | Self::Spawn { .. } => 1,
            Self::Internal(_) => 1,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SetupFailure { .. } => "SETUP_FAILURE",
            Self::PortExhaustion { .. } => "PORT_EXHAUSTION",
            Self::InvalidPort(_) => "INVALID_PORT",
            Self::AlreadyLaunched(_) => "ALREADY_LAUNCHED",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
