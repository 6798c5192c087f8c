//! SQLite connection handling for the durable log.
//!
//! The log is write-heavy in short bursts (status transitions, step records,
//! timers) and read-mostly in between, so connections are split: one writer
//! connection serializes every mutation, and a wider read-only pool serves
//! status queries and timer polls concurrently. WAL mode lets the readers
//! proceed while a write is in flight.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Upper bound on concurrent read connections.
const MAX_READERS: u32 = 8;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader/writer pool pair over one SQLite file.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only pool for SELECTs; up to [`MAX_READERS`] connections.
    pub reader: SqlitePool,
    /// Single-connection pool that owns all writes.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the database at `database_url`, creating the file if needed,
    /// and bring the schema up to date before any reader connects.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(MAX_READERS)
            .connect_with(opts.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Database URL used when the embedding application does not supply one.
///
/// Resolves to `$DURAFLOW_DATA_DIR/duraflow.db` when that variable is set,
/// otherwise to `duraflow.db` under `~/.duraflow`.
pub fn default_database_url() -> String {
    let data_dir = match std::env::var("DURAFLOW_DATA_DIR") {
        Ok(dir) => dir,
        Err(_) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{home}/.duraflow")
        }
    };
    format!("sqlite://{data_dir}/duraflow.db")
}
