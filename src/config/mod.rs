use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::port::DEFAULT_MAX_ATTEMPTS;
use crate::supervisor::SupervisorError;

/// Config file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "devpair.toml";

/// Placeholder replaced by the resolved port inside `port_args`.
const PORT_PLACEHOLDER: &str = "{port}";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "ConfigFile")]
pub struct DevConfig {
    /// Project root; not read from the file, set by the loader.
    pub root: PathBuf,
    pub backend: ServiceConfig,
    pub frontend: ServiceConfig,
    pub ports: PortConfig,
    pub shutdown: ShutdownConfig,
    pub dependencies: DependencyConfig,
}

/// How one of the two children is started.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Working directory, relative to the project root.
    pub dir: PathBuf,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Preferred port.
    pub port: u16,
    /// Variable receiving the service's own resolved port.
    pub port_env: Option<String>,
    /// Extra arguments appended to `command`; `{port}` becomes the resolved port.
    pub port_args: Vec<String>,
    /// Variable receiving the backend's resolved port.
    pub backend_port_env: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// On-disk shape of `devpair.toml`. Every table and key is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigFile {
    backend: ServiceOverrides,
    frontend: ServiceOverrides,
    ports: PortConfig,
    shutdown: ShutdownConfig,
    dependencies: DependencyConfig,
}

/// A `[backend]` / `[frontend]` table, applied over the role's defaults.
///
/// An empty string for `port_env` or `backend_port_env` turns that variable off.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ServiceOverrides {
    dir: Option<PathBuf>,
    command: Option<Vec<String>>,
    port: Option<u16>,
    port_env: Option<String>,
    port_args: Option<Vec<String>>,
    backend_port_env: Option<String>,
    env: BTreeMap<String, String>,
}

impl ServiceOverrides {
    fn apply(self, mut base: ServiceConfig) -> ServiceConfig {
        if let Some(dir) = self.dir {
            base.dir = dir;
        }
        if let Some(command) = self.command {
            base.command = command;
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(key) = self.port_env {
            base.port_env = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(args) = self.port_args {
            base.port_args = args;
        }
        if let Some(key) = self.backend_port_env {
            base.backend_port_env = Some(key).filter(|k| !k.is_empty());
        }
        base.env.extend(self.env);
        base
    }
}

impl From<ConfigFile> for DevConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            root: PathBuf::from("."),
            backend: file.backend.apply(ServiceConfig::backend()),
            frontend: file.frontend.apply(ServiceConfig::frontend()),
            ports: file.ports,
            shutdown: file.shutdown,
            dependencies: file.dependencies,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PortConfig {
    pub max_attempts: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_ms: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DependencyConfig {
    pub enabled: bool,
    pub install_command: Vec<String>,
    /// Path inside the service directory whose presence means "already installed".
    pub marker: String,
}

impl ServiceConfig {
    pub fn backend() -> Self {
        Self {
            dir: PathBuf::from("server"),
            command: npm_run_dev(),
            port: 3001,
            port_env: Some("PORT".to_string()),
            port_args: Vec::new(),
            backend_port_env: None,
            env: BTreeMap::new(),
        }
    }

    pub fn frontend() -> Self {
        Self {
            dir: PathBuf::from("client"),
            command: npm_run_dev(),
            port: 5173,
            port_env: None,
            port_args: vec!["--".into(), "--port".into(), PORT_PLACEHOLDER.into()],
            backend_port_env: Some("VITE_API_PORT".to_string()),
            env: BTreeMap::new(),
        }
    }

    pub fn working_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.dir)
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments after the program, with `port_args` appended and substituted.
    pub fn launch_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.command
            .iter()
            .skip(1)
            .cloned()
            .chain(self.port_args.iter().map(|a| a.replace(PORT_PLACEHOLDER, &port)))
            .collect()
    }

    /// Environment overlay for this service given both resolved ports.
    pub fn env_overlay(&self, own_port: u16, backend_port: u16) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(key) = &self.port_env {
            env.insert(key.clone(), own_port.to_string());
        }
        if let Some(key) = &self.backend_port_env {
            env.insert(key.clone(), backend_port.to_string());
        }
        env
    }

    fn validate(&self, label: &str) -> Result<(), SupervisorError> {
        if self.program().trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(format!(
                "{}.command must name a program",
                label
            )));
        }
        if self.port == 0 {
            return Err(SupervisorError::InvalidConfig(format!(
                "{}.port must be between 1 and 65535",
                label
            )));
        }
        Ok(())
    }
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            backend: ServiceConfig::backend(),
            frontend: ServiceConfig::frontend(),
            ports: PortConfig::default(),
            shutdown: ShutdownConfig::default(),
            dependencies: DependencyConfig::default(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_period_ms: 5_000 }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            install_command: vec!["npm".into(), "install".into()],
            marker: "node_modules".to_string(),
        }
    }
}

impl DevConfig {
    /// Resolve the project root and config file from the environment.
    ///
    /// - `DEVPAIR_ROOT`: project root (default: current directory)
    /// - `DEVPAIR_CONFIG`: config file (default: `<root>/devpair.toml`)
    pub fn from_env() -> Result<Self, SupervisorError> {
        let root = match std::env::var_os("DEVPAIR_ROOT") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|e| SupervisorError::InvalidConfig(format!("current directory: {}", e)))?,
        };
        match std::env::var_os("DEVPAIR_CONFIG") {
            Some(file) => Self::load_file(&root, Path::new(&file)),
            None => Self::load(&root),
        }
    }

    /// Load `<root>/devpair.toml`, falling back to defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self, SupervisorError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, root.display());
            let cfg = Self {
                root: root.to_path_buf(),
                ..Self::default()
            };
            cfg.validate()?;
            return Ok(cfg);
        }
        Self::load_file(root, &path)
    }

    fn load_file(root: &Path, path: &Path) -> Result<Self, SupervisorError> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            SupervisorError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Self::from_toml_str(root, &s)
    }

    pub fn from_toml_str(root: &Path, s: &str) -> Result<Self, SupervisorError> {
        let mut cfg: Self =
            toml::from_str(s).map_err(|e| SupervisorError::InvalidConfig(e.to_string()))?;
        cfg.root = root.to_path_buf();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        self.backend.validate("backend")?;
        self.frontend.validate("frontend")?;
        if self.dependencies.enabled && self.dependencies.install_command.is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "dependencies.install_command is empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn npm_run_dev() -> Vec<String> {
    vec!["npm".into(), "run".into(), "dev".into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_npm_project_layout() {
        let cfg = DevConfig::default();
        assert_eq!(cfg.backend.dir, PathBuf::from("server"));
        assert_eq!(cfg.frontend.dir, PathBuf::from("client"));
        assert_eq!(cfg.backend.port, 3001);
        assert_eq!(cfg.frontend.port, 5173);
        assert_eq!(cfg.ports.max_attempts, 100);
        assert_eq!(cfg.shutdown.grace_period(), Duration::from_secs(5));
        assert_eq!(cfg.dependencies.marker, "node_modules");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn frontend_args_carry_resolved_port() {
        let frontend = ServiceConfig::frontend();
        assert_eq!(frontend.program(), "npm");
        assert_eq!(frontend.launch_args(5174), vec!["run", "dev", "--", "--port", "5174"]);

        let backend = ServiceConfig::backend();
        assert_eq!(backend.launch_args(3002), vec!["run", "dev"]);
    }

    #[test]
    fn env_overlay_per_role() {
        let backend = ServiceConfig::backend().env_overlay(3002, 3002);
        assert_eq!(backend.get("PORT").map(String::as_str), Some("3002"));
        assert!(!backend.contains_key("VITE_API_PORT"));

        let frontend = ServiceConfig::frontend().env_overlay(5173, 3002);
        assert_eq!(frontend.get("VITE_API_PORT").map(String::as_str), Some("3002"));
        assert!(!frontend.contains_key("PORT"));
    }

    #[test]
    fn overlay_ports_win_over_static_env() {
        let mut backend = ServiceConfig::backend();
        backend.env.insert("PORT".into(), "1".into());
        backend.env.insert("NODE_ENV".into(), "development".into());
        let env = backend.env_overlay(3002, 3002);
        assert_eq!(env["PORT"], "3002");
        assert_eq!(env["NODE_ENV"], "development");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = DevConfig::from_toml_str(
            Path::new("/tmp/project"),
            r#"
                [ports]
                max_attempts = 10

                [shutdown]
                grace_period_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.root, PathBuf::from("/tmp/project"));
        assert_eq!(cfg.ports.max_attempts, 10);
        assert_eq!(cfg.shutdown.grace_period(), Duration::from_millis(250));
        assert_eq!(cfg.backend, ServiceConfig::backend());
    }

    #[test]
    fn full_service_table() {
        let cfg = DevConfig::from_toml_str(
            Path::new("."),
            r#"
                [backend]
                dir = "api"
                command = ["cargo", "run"]
                port = 8080
                port_env = "APP_PORT"

                [backend.env]
                RUST_LOG = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.dir, PathBuf::from("api"));
        assert_eq!(cfg.backend.program(), "cargo");
        assert_eq!(cfg.backend.port_env.as_deref(), Some("APP_PORT"));
        assert_eq!(cfg.backend.env["RUST_LOG"], "debug");
        assert!(cfg.backend.port_args.is_empty());
    }

    #[test]
    fn custom_service_tables_keep_port_wiring() {
        let cfg = DevConfig::from_toml_str(
            Path::new("/srv/app"),
            r#"
                [backend]
                dir = "api"
                command = ["npm", "start"]
                port = 4000

                [frontend]
                dir = "web"
                command = ["npm", "run", "dev"]
                port = 5174
            "#,
        )
        .unwrap();

        let backend = cfg.backend.env_overlay(4001, 4001);
        assert_eq!(backend.get("PORT").map(String::as_str), Some("4001"));
        assert_eq!(cfg.backend.launch_args(4001), vec!["start"]);

        let frontend = cfg.frontend.env_overlay(5175, 4001);
        assert_eq!(frontend.get("VITE_API_PORT").map(String::as_str), Some("4001"));
        assert_eq!(cfg.frontend.launch_args(5175), vec!["run", "dev", "--", "--port", "5175"]);
    }

    #[test]
    fn single_key_override_keeps_the_rest() {
        let cfg = DevConfig::from_toml_str(Path::new("."), "[frontend]\nport = 3000\n").unwrap();
        assert_eq!(cfg.frontend.port, 3000);
        assert_eq!(cfg.frontend.dir, PathBuf::from("client"));
        assert_eq!(cfg.frontend.command, ServiceConfig::frontend().command);
        assert_eq!(cfg.backend, ServiceConfig::backend());
    }

    #[test]
    fn empty_port_env_disables_it() {
        let cfg = DevConfig::from_toml_str(
            Path::new("."),
            "[backend]\nport_env = \"\"\n\n[frontend]\nbackend_port_env = \"\"\n",
        )
        .unwrap();
        assert!(cfg.backend.env_overlay(3001, 3001).is_empty());
        assert!(cfg.frontend.env_overlay(5173, 3001).is_empty());
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = DevConfig::from_toml_str(
            Path::new("."),
            r#"
                [frontend]
                dir = "web"
                command = []
                port = 5173
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidConfig(_)));
    }

    #[test]
    fn zero_port_is_rejected() {
        let err = DevConfig::from_toml_str(
            Path::new("."),
            r#"
                [backend]
                dir = "server"
                command = ["npm", "start"]
                port = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("backend.port"));
    }

    #[test]
    fn malformed_toml_is_invalid_config() {
        let err = DevConfig::from_toml_str(Path::new("."), "[ports\nmax_attempts = ").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DevConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.root, dir.path());
        assert_eq!(cfg.frontend, ServiceConfig::frontend());
    }

    #[test]
    fn file_in_root_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[dependencies]\nenabled = false\n",
        )
        .unwrap();
        let cfg = DevConfig::load(dir.path()).unwrap();
        assert!(!cfg.dependencies.enabled);
        assert_eq!(cfg.dependencies.install_command, vec!["npm", "install"]);
    }
}
