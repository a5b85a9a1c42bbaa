//! Shared utility functions for spawning child commands.

use tokio::process::Command;

/// Windows: hide the console window of helper commands.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// Put a long-running child into its own process group.
///
/// The group id equals the child's pid, so a stop signal sent to the group also
/// reaches whatever the child forks (`npm run dev` → `node` → `vite`). A terminal
/// Ctrl+C then only reaches the supervisor, which decides how the children stop.
#[cfg(unix)]
pub fn detach_process_group(cmd: &mut Command) -> &mut Command {
    cmd.process_group(0)
}

#[cfg(target_os = "windows")]
pub fn detach_process_group(cmd: &mut Command) -> &mut Command {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP)
}
