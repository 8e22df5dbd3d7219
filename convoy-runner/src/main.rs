//! Convoy Runner
//!
//! Drives a container service's build -> deploy pipeline.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Services: Source, build and deploy stages plus the controller driving them
//! - Repository: Run records, queryable after completion
//! - Scheduler: Source watcher launching runs on change
//! - API: HTTP endpoints to trigger, inspect and cancel runs
//!
//! Lifecycle events fan out over a broadcast channel to the notification
//! dispatcher, which runs in its own task.

mod api;
mod config;
mod context;
mod podman;
mod repository;
mod scheduler;
mod service;
mod shell;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::podman::ContainerCli;
use crate::repository::InMemoryRunRepository;
use crate::scheduler::SourceWatcher;
use crate::service::{
    BuildStage, DeployGate, DeploySettings, DeployStage, EventBus, NotificationDispatcher,
    PipelineController, PodmanServiceTarget, RegistrySource, SourceAdapter, SourceStage, Stages,
    VcsSource,
};
use crate::shell::{CommandRunner, ShellRunner};
use convoy_core::domain::source::SourceKind;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy_runner=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Convoy Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: pipeline={}, stage={}, source={}",
        config.pipeline_name(),
        config.stage,
        config.source_kind
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
    let cli = ContainerCli::new(config.engine.clone(), Arc::clone(&runner));

    if let Err(e) = cli.check_available().await {
        warn!("Container engine check failed: {:#}", e);
    }

    let controller = Arc::new(build_controller(&config, runner, cli, EventBus::new())?);
    let dispatcher = NotificationDispatcher::new(config.hook_url.clone(), config.namespace.clone());

    info!("Services initialized");

    let cancel = CancellationToken::new();

    // Notification dispatcher
    let dispatcher_handle = {
        let rx = controller.events().subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(rx, cancel).await })
    };

    // HTTP API
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    let server_handle = {
        let app = api::create_router(Arc::clone(&controller));
        let cancel = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        })
    };

    // Source watcher
    let watcher = SourceWatcher::new(Arc::clone(&controller), config.poll_interval);
    let watcher_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watcher.run(cancel).await })
    };

    info!("Runner initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    cancel.cancel();

    if let Err(e) = watcher_handle.await {
        warn!("Watcher task panicked: {}", e);
    }
    match server_handle.await {
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => warn!("Server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = dispatcher_handle.await {
        warn!("Dispatcher task panicked: {}", e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Wires the stages, target and repository into a controller
fn build_controller(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
    cli: ContainerCli,
    events: EventBus,
) -> Result<PipelineController> {
    let adapter = match config.source_kind {
        SourceKind::Vcs => SourceAdapter::Vcs(VcsSource {
            repository: config
                .code_repository
                .clone()
                .context("code_repository is required for vcs sources")?,
            branch: config.branch.clone(),
        }),
        SourceKind::Registry => SourceAdapter::Registry(RegistrySource {
            repository: config.repository_uri(),
        }),
    };

    let stages = Stages {
        source: SourceStage::new(adapter, Arc::clone(&runner), cli.clone()),
        build: BuildStage::new(
            runner,
            config.build_parameters(),
            config.code_repository.clone(),
            config.context_dir.clone(),
            config.workspace.clone(),
            config.artifacts_dir.clone(),
        ),
        deploy: DeployStage::new(
            DeployGate::new(),
            DeploySettings {
                timeout: config.deploy_timeout,
                poll_interval: config.health_poll_interval,
            },
        ),
    };

    let target = Arc::new(PodmanServiceTarget::new(
        config.service_name.clone(),
        config.replicas,
        config.service_port,
        config.service_host.clone(),
        cli,
    ));

    Ok(PipelineController::new(
        config.pipeline_name(),
        stages,
        target,
        events,
        Arc::new(InMemoryRunRepository::new()),
    ))
}
