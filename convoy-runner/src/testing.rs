//! Test doubles for external effects

use anyhow::Result;
use async_trait::async_trait;
use convoy_core::domain::build_spec::BuildParameters;
use convoy_core::domain::deploy::ReplicaHealth;
use convoy_core::domain::image::RepositoryUri;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::podman::ContainerCli;
use crate::repository::InMemoryRunRepository;
use crate::service::{
    BuildStage, DeployGate, DeploySettings, DeployStage, EventBus, PipelineController,
    RegistrySource, ServiceTarget, SourceAdapter, SourceStage, Stages, VcsSource,
};
use crate::shell::{CommandOutput, CommandRunner, CommandSpec};

struct Response {
    pattern: String,
    output: CommandOutput,
}

/// Records commands and answers them from scripted responses
///
/// A command gets the most recently scripted response whose pattern it
/// contains; anything unscripted succeeds with empty output.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<Vec<Response>>,
    specs: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().push(Response {
            pattern: pattern.to_string(),
            output: CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        });
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.line).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.specs.lock().unwrap().push(spec.clone());

        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .rev()
            .find(|r| spec.line.contains(&r.pattern))
            .map(|r| r.output.clone())
            .unwrap_or_default())
    }
}

/// In-memory service whose replicas are healthy unless marked otherwise
pub struct FakeTarget {
    name: String,
    desired: u32,
    image: Mutex<Option<String>>,
    unhealthy: Mutex<HashSet<String>>,
    updates: Mutex<Vec<String>>,
    update_delay: Duration,
}

impl FakeTarget {
    pub fn new(name: &str, image: Option<&str>, desired: u32) -> Self {
        Self {
            name: name.to_string(),
            desired,
            image: Mutex::new(image.map(str::to_string)),
            unhealthy: Mutex::new(HashSet::new()),
            updates: Mutex::new(Vec::new()),
            update_delay: Duration::ZERO,
        }
    }

    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    pub fn mark_unhealthy(&self, image: &str) {
        self.unhealthy.lock().unwrap().insert(image.to_string());
    }

    pub fn mark_healthy(&self, image: &str) {
        self.unhealthy.lock().unwrap().remove(image);
    }

    pub fn image(&self) -> Option<String> {
        self.image.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceTarget for FakeTarget {
    fn id(&self) -> &str {
        &self.name
    }

    fn container_name(&self) -> &str {
        &self.name
    }

    async fn current_image(&self) -> Result<Option<String>> {
        Ok(self.image())
    }

    async fn update_image(&self, image_uri: &str) -> Result<()> {
        self.updates.lock().unwrap().push(image_uri.to_string());
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        *self.image.lock().unwrap() = Some(image_uri.to_string());
        Ok(())
    }

    async fn replica_health(&self) -> Result<ReplicaHealth> {
        let healthy = match self.image() {
            Some(image) if !self.unhealthy.lock().unwrap().contains(&image) => self.desired,
            _ => 0,
        };
        Ok(ReplicaHealth::new(self.desired, healthy))
    }
}

/// Controller for a VCS pipeline named `DevEcho` deploying service `echo`
pub fn controller(runner: Arc<FakeRunner>, target: Arc<FakeTarget>) -> PipelineController {
    let adapter = SourceAdapter::Vcs(VcsSource {
        repository: "https://git.example.com/echo.git".to_string(),
        branch: "main".to_string(),
    });
    controller_for(adapter, runner, target)
}

/// Same pipeline, promoting `registry.local/echo:latest` instead
pub fn registry_controller(runner: Arc<FakeRunner>, target: Arc<FakeTarget>) -> PipelineController {
    let adapter = SourceAdapter::Registry(RegistrySource {
        repository: RepositoryUri::new("registry.local", "echo"),
    });
    controller_for(adapter, runner, target)
}

fn controller_for(
    adapter: SourceAdapter,
    runner: Arc<FakeRunner>,
    target: Arc<FakeTarget>,
) -> PipelineController {
    let base = std::env::temp_dir().join(format!("convoy-test-{}", uuid::Uuid::new_v4()));
    let params = BuildParameters {
        service_name: "echo".to_string(),
        region: "ap-northeast-2".to_string(),
        repository: RepositoryUri::new("registry.local", "echo"),
        engine: "podman".to_string(),
        install: vec![],
        login_command: None,
    };

    let source = SourceStage::new(
        adapter,
        runner.clone(),
        ContainerCli::new("podman", runner.clone()),
    );
    let build = BuildStage::new(
        runner,
        params,
        Some("https://git.example.com/echo.git".to_string()),
        "app".to_string(),
        base.join("workspace"),
        base.join("artifacts"),
    );
    let deploy = DeployStage::new(
        DeployGate::new(),
        DeploySettings {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        },
    );

    PipelineController::new(
        "DevEcho".to_string(),
        Stages {
            source,
            build,
            deploy,
        },
        target,
        EventBus::new(),
        Arc::new(InMemoryRunRepository::new()),
    )
}
