use std::process::ExitCode;

use devpair::config::DevConfig;
use devpair::console::Console;
use devpair::session;
use devpair::supervisor::SupervisorError;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let console = Console::stdout();

    let config = match DevConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => return fail(&console, e),
    };
    tracing::info!("Project root: {}", config.root.display());

    match session::run(config, console.clone()).await {
        Ok(report) => {
            tracing::info!("Session ended with exit code {}", report.exit_code);
            ExitCode::from(report.exit_code)
        }
        Err(e) => fail(&console, e),
    }
}

fn fail(console: &Console, err: SupervisorError) -> ExitCode {
    tracing::error!("[{}] {}", err.error_code(), err);
    console.error(err.to_string());
    ExitCode::from(err.exit_code())
}
