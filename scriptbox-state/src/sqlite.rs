//! SQLite persistence gateway
//!
//! sqlx is async; the cache is not. Every call bridges through the runtime
//! handle captured at connect time, so these methods must run on a thread
//! that is not itself driving the runtime (e.g. inside `spawn_blocking`).

use std::str::FromStr;

use scriptbox_config::StorageConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tokio::runtime::Handle;

use crate::error::StateResult;
use crate::record::{VariableKind, VariableRecord};
use crate::store::{VariableStore, VariableTransaction};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS variables (
    name TEXT PRIMARY KEY NOT NULL,
    kind INTEGER NOT NULL,
    data TEXT NOT NULL,
    version INTEGER NOT NULL
)";

// SQLite has no SELECT ... FOR UPDATE; a no-op write takes the database
// write lock, which is then held until the transaction ends.
const LOCK_ROW: &str = "UPDATE variables SET name = name WHERE name = ?";

const SELECT_ROW: &str = "SELECT kind, data, version FROM variables WHERE name = ?";

const UPSERT_ROW: &str = "INSERT INTO variables (name, kind, data, version) VALUES (?, ?, ?, ?)
    ON CONFLICT (name) DO UPDATE SET kind = excluded.kind, data = excluded.data, version = excluded.version";

/// Variable store on a SQLite database
#[derive(Clone)]
pub struct SqliteVariableStore {
    pool: SqlitePool,
    handle: Handle,
}

impl SqliteVariableStore {
    /// Open the database described by `config`
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(config: &StorageConfig) -> StateResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        tracing::debug!(url = %config.database_url, "Connected to variable store");

        Ok(Self {
            pool,
            handle: Handle::current(),
        })
    }

    /// Create the variables table if it does not exist
    pub async fn migrate(&self) -> StateResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Read a record without locking it
    pub async fn fetch(&self, name: &str) -> StateResult<Option<VariableRecord>> {
        let row: Option<(i64, String, i64)> = sqlx::query_as(SELECT_ROW)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| to_record(name, row)).transpose()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl VariableStore for SqliteVariableStore {
    fn begin(&self) -> StateResult<Box<dyn VariableTransaction>> {
        let tx = self.handle.block_on(self.pool.begin())?;
        Ok(Box::new(SqliteTransaction {
            tx,
            handle: self.handle.clone(),
        }))
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    handle: Handle,
}

impl VariableTransaction for SqliteTransaction {
    fn load_for_update(&mut self, name: &str) -> StateResult<Option<VariableRecord>> {
        let tx = &mut self.tx;
        let row: Option<(i64, String, i64)> = self.handle.block_on(async {
            sqlx::query(LOCK_ROW).bind(name).execute(&mut **tx).await?;
            sqlx::query_as::<_, (i64, String, i64)>(SELECT_ROW)
                .bind(name)
                .fetch_optional(&mut **tx)
                .await
        })?;

        row.map(|row| to_record(name, row)).transpose()
    }

    fn upsert(&mut self, record: &VariableRecord) -> StateResult<()> {
        let tx = &mut self.tx;
        self.handle.block_on(
            sqlx::query(UPSERT_ROW)
                .bind(&record.name)
                .bind(record.kind.as_i32())
                .bind(&record.data)
                .bind(record.version)
                .execute(&mut **tx),
        )?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> StateResult<()> {
        let SqliteTransaction { tx, handle } = *self;
        handle.block_on(tx.commit())?;
        Ok(())
    }
}

fn to_record(name: &str, (kind, data, version): (i64, String, i64)) -> StateResult<VariableRecord> {
    Ok(VariableRecord {
        name: name.to_string(),
        kind: VariableKind::try_from(kind)?,
        data,
        version: version as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open(dir: &tempfile::TempDir) -> SqliteVariableStore {
        let config = StorageConfig {
            database_url: format!("sqlite://{}", dir.path().join("vars.db").display()),
            busy_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let store = SqliteVariableStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_upsert_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let writer = store.clone();
        tokio::task::spawn_blocking(move || {
            let mut tx = writer.begin().unwrap();
            assert!(tx.load_for_update("x").unwrap().is_none());
            tx.upsert(&VariableRecord::value("x", "[1,2]")).unwrap();
            tx.upsert(&VariableRecord::value("x", "[1,2,3]")).unwrap();
            tx.commit().unwrap();
        })
        .await
        .unwrap();

        let record = store.fetch("x").await.unwrap().unwrap();
        assert_eq!(record.data, "[1,2,3]");
        assert_eq!(record.kind, VariableKind::Value);
        assert_eq!(record.version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let writer = store.clone();
        tokio::task::spawn_blocking(move || {
            let mut tx = writer.begin().unwrap();
            tx.upsert(&VariableRecord::method("f", "function f() {}", 2))
                .unwrap();
        })
        .await
        .unwrap();

        assert!(store.fetch("f").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_method_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let writer = store.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            let mut tx = writer.begin().unwrap();
            tx.upsert(&VariableRecord::method("op_Plus", "(a, b) => a + b", 1))
                .unwrap();
            tx.commit().unwrap();

            let mut tx = writer.begin().unwrap();
            let record = tx.load_for_update("op_Plus").unwrap();
            record
        })
        .await
        .unwrap()
        .unwrap();

        assert!(loaded.is_method());
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_writer_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let first = store.clone();
        let second = store.clone();
        tokio::task::spawn_blocking(move || {
            let mut tx = first.begin().unwrap();
            tx.upsert(&VariableRecord::value("counter", "0")).unwrap();
            tx.commit().unwrap();

            let mut tx = first.begin().unwrap();
            assert_eq!(tx.load_for_update("counter").unwrap().unwrap().data, "0");

            let started = std::time::Instant::now();
            let waiter = std::thread::spawn(move || {
                let mut tx = second.begin().unwrap();
                let seen = tx.load_for_update("counter").unwrap().unwrap();
                tx.upsert(&VariableRecord::value("counter", "2")).unwrap();
                tx.commit().unwrap();
                (started.elapsed(), seen.data)
            });

            std::thread::sleep(Duration::from_millis(300));
            tx.upsert(&VariableRecord::value("counter", "1")).unwrap();
            tx.commit().unwrap();

            let (waited, seen) = waiter.join().unwrap();
            assert!(waited >= Duration::from_millis(250), "waited {:?}", waited);
            assert_eq!(seen, "1");
        })
        .await
        .unwrap();

        assert_eq!(store.fetch("counter").await.unwrap().unwrap().data, "2");
    }
}
