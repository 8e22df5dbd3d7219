//! Container-managed service target
//!
//! Runs a service as `replicas` containers named `{service}-{i}`, replica
//! `i` published on host port `service_port + i`. A replica is healthy when
//! `GET /` on its published port answers with a success status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use convoy_core::domain::deploy::ReplicaHealth;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::podman::ContainerCli;
use crate::service::deploy::ServiceTarget;

/// Service replicas managed through the container engine
pub struct PodmanServiceTarget {
    name: String,
    replicas: u32,
    port: u16,
    host: String,
    cli: ContainerCli,
    client: Client,
}

impl PodmanServiceTarget {
    pub fn new(name: String, replicas: u32, port: u16, host: String, cli: ContainerCli) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            name,
            replicas,
            port,
            host,
            cli,
            client,
        }
    }

    fn replica_name(&self, index: u32) -> String {
        format!("{}-{}", self.name, index)
    }

    fn replica_port(&self, index: u32) -> Result<u16> {
        u16::try_from(u32::from(self.port) + index)
            .with_context(|| format!("replica {} port out of range", index))
    }

    async fn probe(&self, index: u32) -> bool {
        let Ok(port) = self.replica_port(index) else {
            return false;
        };
        let url = format!("http://{}:{}/", self.host, port);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Probe of {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ServiceTarget for PodmanServiceTarget {
    fn id(&self) -> &str {
        &self.name
    }

    fn container_name(&self) -> &str {
        &self.name
    }

    /// Image of the first replica that exists
    async fn current_image(&self) -> Result<Option<String>> {
        for index in 0..self.replicas {
            if let Some(image) = self.cli.container_image(&self.replica_name(index)).await? {
                return Ok(Some(image));
            }
        }
        Ok(None)
    }

    async fn update_image(&self, image_uri: &str) -> Result<()> {
        self.cli.pull(image_uri).await?;

        for index in 0..self.replicas {
            let name = self.replica_name(index);
            self.cli.remove(&name).await?;
            self.cli
                .run_detached(&name, image_uri, self.replica_port(index)?, self.port)
                .await?;
        }

        Ok(())
    }

    async fn replica_health(&self) -> Result<ReplicaHealth> {
        let mut healthy = 0;
        for index in 0..self.replicas {
            if self.probe(index).await {
                healthy += 1;
            }
        }
        Ok(ReplicaHealth::new(self.replicas, healthy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use std::sync::Arc;

    fn target(runner: Arc<FakeRunner>, replicas: u32, port: u16) -> PodmanServiceTarget {
        PodmanServiceTarget::new(
            "echo".to_string(),
            replicas,
            port,
            "127.0.0.1".to_string(),
            ContainerCli::new("podman", runner),
        )
    }

    #[tokio::test]
    async fn test_update_replaces_every_replica() {
        let runner = Arc::new(FakeRunner::new());
        target(runner.clone(), 2, 8080)
            .update_image("registry.local/echo:42")
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "podman pull registry.local/echo:42",
                "podman rm -f echo-0",
                "podman run -d --name echo-0 -p 8080:8080 registry.local/echo:42",
                "podman rm -f echo-1",
                "podman run -d --name echo-1 -p 8081:8080 registry.local/echo:42",
            ]
        );
    }

    #[tokio::test]
    async fn test_current_image_reads_first_replica() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("container inspect", 0, "registry.local/echo:41\n", "");

        let image = target(runner.clone(), 1, 8080).current_image().await.unwrap();
        assert_eq!(image.as_deref(), Some("registry.local/echo:41"));
        assert!(runner.commands()[0].ends_with("echo-0"));
    }

    #[tokio::test]
    async fn test_current_image_skips_missing_replicas() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("container inspect", 0, "registry.local/echo:41\n", "");
        runner.respond("echo-0", 1, "", "no such container");

        let image = target(runner.clone(), 3, 8080).current_image().await.unwrap();
        assert_eq!(image.as_deref(), Some("registry.local/echo:41"));
        assert_eq!(runner.commands().len(), 2);

        let runner = Arc::new(FakeRunner::new());
        runner.respond("container inspect", 1, "", "no such container");
        let image = target(runner.clone(), 2, 8080).current_image().await.unwrap();
        assert_eq!(image, None);
        assert_eq!(runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_health_probes_published_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = axum::Router::new().route("/", axum::routing::get(|| async { "ok" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let runner = Arc::new(FakeRunner::new());
        let health = target(runner.clone(), 1, port).replica_health().await.unwrap();
        assert!(health.is_fully_healthy());

        // Replica 1 would be published on port + 1, where nothing listens
        let health = target(runner, 2, port).replica_health().await.unwrap();
        assert_eq!(health, ReplicaHealth::new(2, 1));
    }
}
