//! SQLite backed run store.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::{OwnerRef, OwnerState, PipelineRun, RunStore, SubRunRecord};
use crate::core::StageAttempt;
use crate::errors::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    owner TEXT NOT NULL,
    terminal INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS owners (
    owner TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS claims (
    owner TEXT PRIMARY KEY,
    run_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attempts (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sub_runs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_run_id TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_run ON attempts(run_id);
CREATE INDEX IF NOT EXISTS idx_sub_runs_parent ON sub_runs(parent_run_id);
";

/// A run store kept in one SQLite database.
///
/// Runs, owners and claims are rows holding JSON snapshots. `create_run`
/// and `checkpoint` each commit the run row, the owner row and the claim
/// change in a single transaction, so a failed write leaves all three as
/// they were.
#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Opens (and creates if needed) a database file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn owner_key(owner: OwnerRef) -> String {
    owner.to_string()
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(body)?)
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn put_owner(tx: &Transaction<'_>, owner: OwnerRef, state: &OwnerState) -> Result<(), StoreError> {
    let key = owner_key(owner);
    let body = encode(state)?;
    let updated = tx.execute("UPDATE owners SET body = ?2 WHERE owner = ?1", params![key, body])?;
    if updated == 0 {
        tx.execute("INSERT INTO owners (owner, body) VALUES (?1, ?2)", params![key, body])?;
    }
    Ok(())
}

fn claim_of(conn: &Connection, owner: OwnerRef) -> Result<Option<Uuid>, StoreError> {
    conn.query_row(
        "SELECT run_id FROM claims WHERE owner = ?1",
        params![owner_key(owner)],
        |row| row.get::<_, String>(0),
    )
    .optional()?
    .map(|raw| parse_uuid(&raw))
    .transpose()
}

fn bodies<T: DeserializeOwned>(conn: &Connection, sql: &str, id: Uuid) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter().map(|body| decode(body)).collect()
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Some(active_run) = claim_of(&tx, run.owner())? {
            return Err(StoreError::OwnerBusy {
                owner: run.owner().to_string(),
                active_run,
            });
        }
        let exists = tx
            .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run.id().to_string()], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            return Err(StoreError::DuplicateRun(run.id()));
        }

        tx.execute(
            "INSERT INTO runs (id, pipeline_id, owner, terminal, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id().to_string(),
                run.pipeline_id(),
                owner_key(run.owner()),
                run.is_terminal(),
                encode(run)?
            ],
        )?;
        tx.execute(
            "INSERT INTO claims (owner, run_id) VALUES (?1, ?2)",
            params![owner_key(run.owner()), run.id().to_string()],
        )?;
        put_owner(&tx, run.owner(), owner)?;
        tx.commit()?;
        Ok(())
    }

    async fn checkpoint(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let stored_terminal: Option<bool> = tx
            .query_row(
                "SELECT terminal FROM runs WHERE id = ?1",
                params![run.id().to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match stored_terminal {
            None => return Err(StoreError::RunNotFound(run.id())),
            Some(true) => return Err(StoreError::TerminalRun(run.id())),
            Some(false) => {}
        }

        tx.execute(
            "UPDATE runs SET terminal = ?2, body = ?3 WHERE id = ?1",
            params![run.id().to_string(), run.is_terminal(), encode(run)?],
        )?;
        put_owner(&tx, run.owner(), owner)?;
        if run.is_terminal() {
            tx.execute(
                "DELETE FROM claims WHERE owner = ?1 AND run_id = ?2",
                params![owner_key(run.owner()), run.id().to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, StoreError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row("SELECT body FROM runs WHERE id = ?1", params![run_id.to_string()], |row| {
                row.get(0)
            })
            .optional()?;
        body.map_or(Err(StoreError::RunNotFound(run_id)), |body| decode(&body))
    }

    async fn load_owner(&self, owner: OwnerRef) -> Result<OwnerState, StoreError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row("SELECT body FROM owners WHERE owner = ?1", params![owner_key(owner)], |row| {
                row.get(0)
            })
            .optional()?;
        body.map_or_else(|| Err(StoreError::OwnerNotFound(owner.to_string())), |body| decode(&body))
    }

    async fn active_run(&self, owner: OwnerRef) -> Result<Option<Uuid>, StoreError> {
        claim_of(&self.conn.lock(), owner)
    }

    async fn append_attempt(&self, attempt: StageAttempt) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO attempts (run_id, body) VALUES (?1, ?2)",
            params![attempt.run_id.to_string(), encode(&attempt)?],
        )?;
        Ok(())
    }

    async fn attempts(&self, run_id: Uuid) -> Result<Vec<StageAttempt>, StoreError> {
        bodies(
            &self.conn.lock(),
            "SELECT body FROM attempts WHERE run_id = ?1 ORDER BY seq",
            run_id,
        )
    }

    async fn record_sub_run(&self, record: SubRunRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO sub_runs (parent_run_id, body) VALUES (?1, ?2)",
            params![record.parent_run_id.to_string(), encode(&record)?],
        )?;
        Ok(())
    }

    async fn sub_runs(&self, parent_run_id: Uuid) -> Result<Vec<SubRunRecord>, StoreError> {
        bodies(
            &self.conn.lock(),
            "SELECT body FROM sub_runs WHERE parent_run_id = ?1 ORDER BY seq",
            parent_run_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::core::{AttemptOutcome, RunStatus, StageOutput};
    use crate::run::ProcessingStatus;
    use chrono::Utc;
    use serde_json::json;

    fn refuse_owner_writes(store: &SqliteRunStore) {
        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER refuse_owner_writes BEFORE UPDATE ON owners
                 BEGIN SELECT RAISE(ABORT, 'owner row is locked'); END;",
            )
            .unwrap();
    }

    fn allow_owner_writes(store: &SqliteRunStore) {
        store
            .conn
            .lock()
            .execute_batch("DROP TRIGGER refuse_owner_writes;")
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let owner = OwnerRef::Document(Uuid::new_v4());
        let mut run = PipelineRun::new("ingestion", owner, RunContext::new());

        {
            let store = SqliteRunStore::open(&path).unwrap();
            store.create_run(&run, &OwnerState::mirror(&run)).await.unwrap();
            run.begin().unwrap();
            run.record_stage_success(0, "validation", StageOutput::new(json!({"ok": true})), 20)
                .unwrap();
            store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();
        }

        let store = SqliteRunStore::open(&path).unwrap();
        assert_eq!(store.load_run(run.id()).await.unwrap(), run);
        assert_eq!(store.active_run(owner).await.unwrap(), Some(run.id()));
    }

    #[tokio::test]
    async fn test_owner_claim_released_on_terminal_checkpoint() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let owner = OwnerRef::CourseGenerationRequest(Uuid::new_v4());
        let mut run = PipelineRun::new("course_generation", owner, RunContext::new());
        store.create_run(&run, &OwnerState::mirror(&run)).await.unwrap();

        let busy = PipelineRun::new("course_generation", owner, RunContext::new());
        assert!(matches!(
            store.create_run(&busy, &OwnerState::mirror(&busy)).await,
            Err(StoreError::OwnerBusy { .. })
        ));

        run.begin().unwrap();
        run.fail("structure generation failed").unwrap();
        store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();

        assert_eq!(store.active_run(owner).await.unwrap(), None);
        assert!(store.load_owner(owner).await.unwrap().is_failed());
        assert!(matches!(
            store.checkpoint(&run, &OwnerState::mirror(&run)).await,
            Err(StoreError::TerminalRun(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_owner_write_rolls_back_terminal_checkpoint() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let owner = OwnerRef::Document(Uuid::new_v4());
        let mut run = PipelineRun::new("ingestion", owner, RunContext::new());
        store.create_run(&run, &OwnerState::mirror(&run)).await.unwrap();
        run.begin().unwrap();
        store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();

        refuse_owner_writes(&store);
        run.fail("parse job did not finish").unwrap();
        let err = store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        let stored = store.load_run(run.id()).await.unwrap();
        assert_eq!(stored.status(), RunStatus::Running);
        assert_eq!(store.active_run(owner).await.unwrap(), Some(run.id()));

        allow_owner_writes(&store);
        store.checkpoint(&run, &OwnerState::mirror(&run)).await.unwrap();
        let OwnerState::Document(document) = store.load_owner(owner).await.unwrap() else {
            panic!("expected a document owner");
        };
        assert_eq!(document.processing_status, ProcessingStatus::Failed);

        let fresh = PipelineRun::new("ingestion", owner, RunContext::new());
        tokio_test::assert_ok!(store.create_run(&fresh, &OwnerState::mirror(&fresh)).await);
    }

    #[tokio::test]
    async fn test_attempts_and_sub_runs_keep_append_order() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let run_id = Uuid::now_v7();

        for (n, outcome) in [(1, AttemptOutcome::RetryableError), (2, AttemptOutcome::Success)] {
            store
                .append_attempt(StageAttempt::new(run_id, "store_document", n, outcome, Utc::now()))
                .await
                .unwrap();
        }

        let attempts = store.attempts(run_id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::RetryableError);
        assert!(attempts[1].is_success());
        assert!(store.attempts(Uuid::nil()).await.unwrap().is_empty());
        assert!(store.sub_runs(run_id).await.unwrap().is_empty());
    }
}
