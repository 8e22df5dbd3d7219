//! Runner configuration
//!
//! Everything the pipeline needs from its surroundings: naming, the source it
//! watches, the registry it pushes to, the service it rolls out and the
//! webhook it notifies. Loaded once at startup and injected into each
//! component; nothing reads the environment after that.

use convoy_core::domain::build_spec::BuildParameters;
use convoy_core::domain::image::RepositoryUri;
use convoy_core::domain::source::SourceKind;
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace prefixed to every resource name (e.g. "Dev")
    pub namespace: String,

    /// Deployment stage label (e.g. "dev", "prod")
    pub stage: String,

    /// Service container name; also the descriptor `name`
    pub service_name: String,

    /// Which source variant this pipeline watches
    pub source_kind: SourceKind,

    /// Git URL of the code repository (VCS sources)
    pub code_repository: Option<String>,

    /// Branch the VCS source is pinned to
    pub branch: String,

    /// Registry region, exported to builds as `REGION`
    pub region: String,

    /// Registry host (e.g. "123456789012.dkr.ecr.ap-northeast-2.amazonaws.com")
    pub registry: String,

    /// Image repository name inside the registry
    pub image_repository: String,

    /// Container engine binary
    pub engine: String,

    /// Commands run in the build's install phase
    pub install_commands: Vec<String>,

    /// Overrides the registry login command
    pub login_command: Option<String>,

    /// Directory inside the checkout that holds the build context
    pub context_dir: String,

    /// Base directory for per-run checkouts
    pub workspace: PathBuf,

    /// Base directory for per-run build artifacts
    pub artifacts_dir: PathBuf,

    /// Webhook notified on run lifecycle events; disabled when unset
    pub hook_url: Option<String>,

    /// How often the source is polled for changes
    pub poll_interval: Duration,

    /// Deployment window: how long replicas may take to become healthy
    pub deploy_timeout: Duration,

    /// Delay between replica health probes
    pub health_poll_interval: Duration,

    /// Desired replica count of the service
    pub replicas: u32,

    /// Port the service container listens on
    pub service_port: u16,

    /// Host the replicas' published ports are reachable on
    pub service_host: String,

    /// Address the runner API binds to
    pub bind_addr: String,
}

impl Config {
    /// Creates a configuration with defaults for a service
    pub fn new(namespace: String, service_name: String) -> Self {
        Self {
            namespace,
            stage: "dev".to_string(),
            image_repository: service_name.clone(),
            service_name,
            source_kind: SourceKind::Registry,
            code_repository: None,
            branch: "main".to_string(),
            region: "ap-northeast-2".to_string(),
            registry: "localhost:5000".to_string(),
            engine: "podman".to_string(),
            install_commands: Vec::new(),
            login_command: None,
            context_dir: "app".to_string(),
            workspace: std::env::temp_dir().join("convoy").join("workspace"),
            artifacts_dir: std::env::temp_dir().join("convoy").join("artifacts"),
            hook_url: None,
            poll_interval: Duration::from_secs(30),
            deploy_timeout: Duration::from_secs(300),
            health_poll_interval: Duration::from_secs(5),
            replicas: 1,
            service_port: 8080,
            service_host: "127.0.0.1".to_string(),
            bind_addr: "0.0.0.0:8090".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONVOY_SERVICE_NAME (required)
    /// - CONVOY_REGISTRY (required)
    /// - CONVOY_NAMESPACE (optional, default: Dev)
    /// - CONVOY_STAGE (optional, default: dev)
    /// - CONVOY_SOURCE_KIND (optional, vcs|registry, default: registry)
    /// - CONVOY_CODE_REPOSITORY (required for vcs)
    /// - CONVOY_BRANCH (optional, default: main)
    /// - REGION (optional, default: ap-northeast-2)
    /// - CONVOY_ECR_REPOSITORY (optional, default: service name)
    /// - CONVOY_ENGINE (optional, default: podman)
    /// - CONVOY_INSTALL_COMMANDS (optional, `;`-separated)
    /// - CONVOY_LOGIN_COMMAND (optional)
    /// - CONVOY_CONTEXT_DIR (optional, default: app)
    /// - CONVOY_WORKSPACE / CONVOY_ARTIFACTS_DIR (optional)
    /// - HOOK_URL (optional)
    /// - POLL_INTERVAL, DEPLOY_TIMEOUT, HEALTH_POLL_INTERVAL (optional, seconds)
    /// - CONVOY_REPLICAS (optional, default: 1)
    /// - CONVOY_SERVICE_PORT (optional, default: 8080)
    /// - CONVOY_SERVICE_HOST (optional, default: 127.0.0.1)
    /// - CONVOY_BIND_ADDR (optional, default: 0.0.0.0:8090)
    pub fn from_env() -> anyhow::Result<Self> {
        let service_name = std::env::var("CONVOY_SERVICE_NAME")
            .map_err(|_| anyhow::anyhow!("CONVOY_SERVICE_NAME environment variable not set"))?;

        let registry = std::env::var("CONVOY_REGISTRY")
            .map_err(|_| anyhow::anyhow!("CONVOY_REGISTRY environment variable not set"))?;

        let namespace = std::env::var("CONVOY_NAMESPACE").unwrap_or_else(|_| "Dev".to_string());

        let mut config = Self::new(namespace, service_name);
        config.registry = registry;

        if let Ok(kind) = std::env::var("CONVOY_SOURCE_KIND") {
            config.source_kind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }

        config.code_repository = std::env::var("CONVOY_CODE_REPOSITORY").ok();
        config.hook_url = std::env::var("HOOK_URL").ok().filter(|url| !url.is_empty());
        config.login_command = std::env::var("CONVOY_LOGIN_COMMAND").ok();

        if let Ok(commands) = std::env::var("CONVOY_INSTALL_COMMANDS") {
            config.install_commands = commands
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }

        let strings = [
            ("CONVOY_STAGE", &mut config.stage),
            ("CONVOY_BRANCH", &mut config.branch),
            ("REGION", &mut config.region),
            ("CONVOY_ECR_REPOSITORY", &mut config.image_repository),
            ("CONVOY_ENGINE", &mut config.engine),
            ("CONVOY_CONTEXT_DIR", &mut config.context_dir),
            ("CONVOY_SERVICE_HOST", &mut config.service_host),
            ("CONVOY_BIND_ADDR", &mut config.bind_addr),
        ];
        for (key, field) in strings {
            if let Ok(value) = std::env::var(key) {
                *field = value;
            }
        }

        if let Ok(dir) = std::env::var("CONVOY_WORKSPACE") {
            config.workspace = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CONVOY_ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(dir);
        }

        config.poll_interval = env_seconds("POLL_INTERVAL").unwrap_or(config.poll_interval);
        config.deploy_timeout = env_seconds("DEPLOY_TIMEOUT").unwrap_or(config.deploy_timeout);
        config.health_poll_interval =
            env_seconds("HEALTH_POLL_INTERVAL").unwrap_or(config.health_poll_interval);

        config.replicas = std::env::var("CONVOY_REPLICAS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(config.replicas);

        config.service_port = std::env::var("CONVOY_SERVICE_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(config.service_port);

        Ok(config)
    }

    /// Pipeline name: namespace followed by the service name
    pub fn pipeline_name(&self) -> String {
        format!("{}{}", self.namespace, self.service_name)
    }

    /// Image repository the build pushes to
    pub fn repository_uri(&self) -> RepositoryUri {
        RepositoryUri::new(&self.registry, &self.image_repository)
    }

    /// Parameters the build specification is rendered from
    pub fn build_parameters(&self) -> BuildParameters {
        BuildParameters {
            service_name: self.service_name.clone(),
            region: self.region.clone(),
            repository: self.repository_uri(),
            engine: self.engine.clone(),
            install: self.install_commands.clone(),
            login_command: self.login_command.clone(),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name cannot be empty");
        }

        if self.registry.trim().is_empty() || self.image_repository.trim().is_empty() {
            anyhow::bail!("registry and image_repository cannot be empty");
        }

        if self.source_kind == SourceKind::Vcs
            && self.code_repository.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("code_repository is required for vcs sources");
        }

        if let Some(repository) = &self.code_repository {
            let malformed = repository.starts_with('-')
                || repository.chars().any(|c| c.is_whitespace() || c.is_control());
            if malformed {
                anyhow::bail!("code_repository '{}' is not a repository URL", repository);
            }
        }

        let branch_ok = !self.branch.is_empty()
            && !self.branch.starts_with(['-', '/'])
            && !self.branch.contains("..")
            && self
                .branch
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
        if !branch_ok {
            anyhow::bail!("branch '{}' is not a valid branch name", self.branch);
        }

        if let Some(url) = &self.hook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("hook_url must start with http:// or https://");
            }
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.deploy_timeout.is_zero() || self.health_poll_interval.is_zero() {
            anyhow::bail!("deploy_timeout and health_poll_interval must be greater than 0");
        }

        if self.replicas == 0 {
            anyhow::bail!("replicas must be greater than 0");
        }

        if self.service_port == 0 {
            anyhow::bail!("service_port must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("Dev".to_string(), "echo".to_string())
    }
}

fn env_seconds(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
