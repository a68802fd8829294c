//! The run persistence port and its in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{OwnerRef, OwnerState, PipelineRun, SubRunRecord};
use crate::core::StageAttempt;
use crate::errors::StoreError;

/// Durable storage for runs, their owner entities and audit data.
///
/// `checkpoint` writes a run and its owner's visible state together, so a
/// reader never observes one without the other. `create_run` claims the
/// owner for the new run; the claim is released by the checkpoint that
/// makes the run terminal.
#[async_trait]
pub trait RunStore: Send + Sync + std::fmt::Debug {
    /// Persists a new run and claims its owner.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OwnerBusy` if another run holds the owner.
    async fn create_run(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError>;

    /// Persists the run and its owner's state in one write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TerminalRun` if the stored run is already terminal.
    async fn checkpoint(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError>;

    /// Loads a run snapshot.
    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, StoreError>;

    /// Loads an owner's visible state.
    async fn load_owner(&self, owner: OwnerRef) -> Result<OwnerState, StoreError>;

    /// Returns the run currently holding an owner, if any.
    async fn active_run(&self, owner: OwnerRef) -> Result<Option<Uuid>, StoreError>;

    /// Appends to the attempt audit log.
    async fn append_attempt(&self, attempt: StageAttempt) -> Result<(), StoreError>;

    /// Returns all attempts recorded for a run, in append order.
    async fn attempts(&self, run_id: Uuid) -> Result<Vec<StageAttempt>, StoreError>;

    /// Records a finished fan-out unit.
    async fn record_sub_run(&self, record: SubRunRecord) -> Result<(), StoreError>;

    /// Returns the fan-out units recorded under a parent run, in record order.
    async fn sub_runs(&self, parent_run_id: Uuid) -> Result<Vec<SubRunRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct Snapshots {
    runs: HashMap<Uuid, PipelineRun>,
    owners: HashMap<OwnerRef, OwnerState>,
    claims: HashMap<OwnerRef, Uuid>,
}

/// In-memory run store.
///
/// Run and owner snapshots share one lock; the append-only logs live in
/// concurrent maps keyed by run id.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    snapshots: RwLock<Snapshots>,
    attempts: DashMap<Uuid, Vec<StageAttempt>>,
    sub_runs: DashMap<Uuid, Vec<SubRunRecord>>,
}

impl InMemoryRunStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an owner entity before any run exists.
    pub fn insert_owner(&self, owner: OwnerState) {
        self.snapshots.write().owners.insert(owner.owner_ref(), owner);
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.snapshots.read().runs.len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write();
        if let Some(active_run) = snapshots.claims.get(&run.owner()) {
            return Err(StoreError::OwnerBusy {
                owner: run.owner().to_string(),
                active_run: *active_run,
            });
        }
        if snapshots.runs.contains_key(&run.id()) {
            return Err(StoreError::DuplicateRun(run.id()));
        }

        snapshots.claims.insert(run.owner(), run.id());
        snapshots.owners.insert(run.owner(), owner.clone());
        snapshots.runs.insert(run.id(), run.clone());
        Ok(())
    }

    async fn checkpoint(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write();
        match snapshots.runs.get(&run.id()) {
            None => return Err(StoreError::RunNotFound(run.id())),
            Some(stored) if stored.is_terminal() => return Err(StoreError::TerminalRun(run.id())),
            Some(_) => {}
        }

        snapshots.runs.insert(run.id(), run.clone());
        snapshots.owners.insert(run.owner(), owner.clone());
        if run.is_terminal() && snapshots.claims.get(&run.owner()) == Some(&run.id()) {
            snapshots.claims.remove(&run.owner());
        }
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, StoreError> {
        self.snapshots
            .read()
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn load_owner(&self, owner: OwnerRef) -> Result<OwnerState, StoreError> {
        self.snapshots
            .read()
            .owners
            .get(&owner)
            .cloned()
            .ok_or_else(|| StoreError::OwnerNotFound(owner.to_string()))
    }

    async fn active_run(&self, owner: OwnerRef) -> Result<Option<Uuid>, StoreError> {
        Ok(self.snapshots.read().claims.get(&owner).copied())
    }

    async fn append_attempt(&self, attempt: StageAttempt) -> Result<(), StoreError> {
        self.attempts.entry(attempt.run_id).or_default().push(attempt);
        Ok(())
    }

    async fn attempts(&self, run_id: Uuid) -> Result<Vec<StageAttempt>, StoreError> {
        Ok(self.attempts.get(&run_id).map(|a| a.value().clone()).unwrap_or_default())
    }

    async fn record_sub_run(&self, record: SubRunRecord) -> Result<(), StoreError> {
        self.sub_runs.entry(record.parent_run_id).or_default().push(record);
        Ok(())
    }

    async fn sub_runs(&self, parent_run_id: Uuid) -> Result<Vec<SubRunRecord>, StoreError> {
        Ok(self.sub_runs.get(&parent_run_id).map(|r| r.value().clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::core::AttemptOutcome;
    use chrono::Utc;

    fn new_run(owner: OwnerRef) -> (PipelineRun, OwnerState) {
        let run = PipelineRun::new("p", owner, RunContext::new());
        let state = OwnerState::mirror(&run);
        (run, state)
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let store = InMemoryRunStore::new();
        let owner = OwnerRef::Document(Uuid::new_v4());
        let (run, state) = new_run(owner);

        store.create_run(&run, &state).await.unwrap();

        assert_eq!(store.load_run(run.id()).await.unwrap(), run);
        assert_eq!(store.load_owner(owner).await.unwrap(), state);
        assert_eq!(store.active_run(owner).await.unwrap(), Some(run.id()));
    }

    #[tokio::test]
    async fn test_second_run_for_owner_is_rejected() {
        let store = InMemoryRunStore::new();
        let owner = OwnerRef::Document(Uuid::new_v4());
        let (first, state) = new_run(owner);
        store.create_run(&first, &state).await.unwrap();

        let (second, state) = new_run(owner);
        let err = store.create_run(&second, &state).await.unwrap_err();
        assert!(matches!(err, StoreError::OwnerBusy { active_run, .. } if active_run == first.id()));
    }

    #[tokio::test]
    async fn test_terminal_checkpoint_releases_owner() {
        let store = InMemoryRunStore::new();
        let owner = OwnerRef::Document(Uuid::new_v4());
        let (mut run, state) = new_run(owner);
        store.create_run(&run, &state).await.unwrap();

        run.begin().unwrap();
        run.fail("boom").unwrap();
        store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();

        assert_eq!(store.active_run(owner).await.unwrap(), None);
        assert!(store.load_owner(owner).await.unwrap().is_failed());

        let (fresh, state) = new_run(owner);
        tokio_test::assert_ok!(store.create_run(&fresh, &state).await);
    }

    #[tokio::test]
    async fn test_terminal_run_cannot_be_overwritten() {
        let store = InMemoryRunStore::new();
        let (mut run, state) = new_run(OwnerRef::Document(Uuid::new_v4()));
        store.create_run(&run, &state).await.unwrap();
        run.begin().unwrap();
        run.fail("boom").unwrap();
        store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();

        let err = store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap_err();
        assert!(matches!(err, StoreError::TerminalRun(_)));
    }

    #[tokio::test]
    async fn test_checkpoint_unknown_run() {
        let store = InMemoryRunStore::new();
        let (run, state) = new_run(OwnerRef::Document(Uuid::new_v4()));
        assert!(matches!(
            store.checkpoint(&run, &state).await,
            Err(StoreError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attempt_log_is_per_run() {
        let store = InMemoryRunStore::new();
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        for n in 1..=2 {
            store
                .append_attempt(StageAttempt::new(run_a, "s", n, AttemptOutcome::RetryableError, Utc::now()))
                .await
                .unwrap();
        }
        store
            .append_attempt(StageAttempt::new(run_b, "s", 1, AttemptOutcome::Success, Utc::now()))
            .await
            .unwrap();

        let attempts = store.attempts(run_a).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].attempt_number, 2);
        assert!(store.attempts(Uuid::nil()).await.unwrap().is_empty());
    }
}
