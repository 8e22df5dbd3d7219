//! Runs repository
//!
//! Keeps run records for the lifetime of the runner process:
//! - Saving a run after each state transition
//! - Looking a run up by id
//! - Listing runs, newest first

use anyhow::Result;
use async_trait::async_trait;
use convoy_core::domain::run::PipelineRun;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Repository trait for run records
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts or replaces a run record
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    /// Finds a run by id
    async fn find(&self, id: Uuid) -> Result<Option<PipelineRun>>;

    /// Lists all runs, newest first
    async fn list(&self) -> Result<Vec<PipelineRun>>;
}

/// In-memory implementation of RunRepository
#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| {
            b.build_number
                .cmp(&a.build_number)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::domain::run::RunStatus;
    use convoy_core::domain::source::Trigger;

    #[tokio::test]
    async fn test_save_replaces_existing_record() {
        let repo = InMemoryRunRepository::new();
        let mut run = PipelineRun::new("DevEcho", 1, Trigger::default());
        repo.save(&run).await.unwrap();

        run.enter(convoy_core::domain::run::Stage::Source).unwrap();
        repo.save(&run).await.unwrap();

        let stored = repo.find(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let repo = InMemoryRunRepository::new();
        for build_number in 1..=3 {
            repo.save(&PipelineRun::new("DevEcho", build_number, Trigger::default()))
                .await
                .unwrap();
        }

        let numbers: Vec<u64> = repo
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.build_number)
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert!(repo.find(Uuid::new_v4()).await.unwrap().is_none());
    }
}
