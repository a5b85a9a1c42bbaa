//! One development session: dependencies → ports → backend → frontend → supervise → shutdown.

use tokio::sync::mpsc;

use crate::config::{DevConfig, ServiceConfig};
use crate::console::Console;
use crate::deps::{DependencyPreparer, DependencyStatus};
use crate::port::{is_port_available, resolve_port, resolve_port_with, PortAssignment};
use crate::supervisor::{
    signal, LaunchSpec, Role, ShutdownReason, ShutdownReport, ShutdownSignal, Supervisor,
    SupervisorError,
};

/// Run a full session with OS signal handling.
///
/// Errors are only returned for failures that happen before any child is live;
/// everything after that ends in a [`ShutdownReport`].
pub async fn run(config: DevConfig, console: Console) -> Result<ShutdownReport, SupervisorError> {
    prepare_dependencies(&config, &console).await?;
    let ports = resolve_ports(&config)?;
    tracing::info!("Resolved ports: backend={}, frontend={}", ports.backend, ports.frontend);

    let mut control = signal::listen()
        .map_err(|e| SupervisorError::Internal(anyhow::anyhow!("failed to install signal handlers: {}", e)))?;

    run_with_control(&config, ports, console, &mut control).await
}

/// Launch, supervise and shut down both children with an explicit control channel.
pub async fn run_with_control(
    config: &DevConfig,
    ports: PortAssignment,
    console: Console,
    control: &mut mpsc::Receiver<ShutdownSignal>,
) -> Result<ShutdownReport, SupervisorError> {
    let mut supervisor = Supervisor::new(console.clone(), config.shutdown.grace_period());

    console.status("🚀 Starting servers...");
    console.blank();

    console.status("📦 Starting backend server...");
    let backend = launch_spec(config, Role::Backend, ports);
    let pid = supervisor.launch(backend)?.pid();
    console.launched(Role::Backend, pid);

    console.status("⚛️  Starting frontend server...");
    let frontend = launch_spec(config, Role::Frontend, ports);
    let reason = match supervisor.launch(frontend).map(|p| p.pid()) {
        Ok(pid) => {
            console.launched(Role::Frontend, pid);
            console.banner(&ports);
            supervisor.run(control).await
        }
        Err(e) => {
            tracing::error!("Frontend launch failed: {}", e);
            ShutdownReason::LaunchFailed {
                role: Role::Frontend,
                message: e.to_string(),
            }
        }
    };

    supervisor
        .shutdown_all(reason)
        .await
        .ok_or_else(|| SupervisorError::Internal(anyhow::anyhow!("shutdown already performed")))
}

/// Install dependencies for backend then frontend.
pub async fn prepare_dependencies(config: &DevConfig, console: &Console) -> Result<(), SupervisorError> {
    if !config.dependencies.enabled {
        return Ok(());
    }
    let preparer = DependencyPreparer::new(&config.dependencies);

    console.status("🔍 Checking dependencies...");
    console.blank();
    for role in [Role::Backend, Role::Frontend] {
        let service = service(config, role);
        let dir = service.working_dir(&config.root);
        if preparer.is_satisfied(&dir) {
            console.status(format!("✅ {} dependencies already installed.", role.title()));
            continue;
        }
        console.status(format!("📥 Installing {} dependencies...", role.title()));
        match preparer.ensure(&dir, role.title()).await? {
            DependencyStatus::Installed => {
                console.status(format!("✅ {} dependencies installed.", role.title()))
            }
            DependencyStatus::AlreadySatisfied | DependencyStatus::Skipped => {}
        }
    }
    console.blank();
    Ok(())
}

/// Resolve the backend port, then the frontend port.
///
/// The backend has not bound its port yet, so the frontend scan treats it as taken.
pub fn resolve_ports(config: &DevConfig) -> Result<PortAssignment, SupervisorError> {
    let attempts = config.ports.max_attempts;
    let backend = resolve_port(config.backend.port, attempts)?;
    let frontend = resolve_port_with(config.frontend.port, attempts, |port| {
        port != backend && is_port_available(port)
    })?;
    Ok(PortAssignment { backend, frontend })
}

/// Build the launch description for `role` from config and the resolved ports.
pub fn launch_spec(config: &DevConfig, role: Role, ports: PortAssignment) -> LaunchSpec {
    let service = service(config, role);
    let own_port = match role {
        Role::Backend => ports.backend,
        Role::Frontend => ports.frontend,
    };
    LaunchSpec {
        role,
        working_dir: service.working_dir(&config.root),
        program: service.program().to_string(),
        args: service.launch_args(own_port),
        env: service.env_overlay(own_port, ports.backend),
    }
}

fn service(config: &DevConfig, role: Role) -> &ServiceConfig {
    match role {
        Role::Backend => &config.backend,
        Role::Frontend => &config.frontend,
    }
}
