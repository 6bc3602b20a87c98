//! Record sinks: where flushed batches end up.
//!
//! A sink receives whole batches from [`crate::store::BatchedStore`]; each
//! `store_batch` call either persists the entire batch or fails without the
//! store forgetting it. Sinks do not deduplicate.

use crate::record::{Address, ProviderRecord};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot open sink: {0}")]
    Open(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persists batches of provider records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write one batch. On `Err` nothing from the batch may be considered
    /// stored; the caller will offer it again.
    async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError>;
}

// ── SQLite ───────────────────────────────────────────────────────────────

const CREATE_PROVIDERS: &str = "CREATE TABLE IF NOT EXISTS providers (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier         TEXT NOT NULL,
    name               TEXT NOT NULL,
    credentials        TEXT,
    specialties        TEXT NOT NULL,
    practice_name      TEXT,
    address_line1      TEXT,
    address_line2      TEXT,
    city               TEXT,
    state              TEXT,
    zip                TEXT,
    address_text       TEXT,
    phone              TEXT,
    telehealth         INTEGER NOT NULL,
    telehealth_details TEXT,
    languages          TEXT NOT NULL,
    county             TEXT,
    source_page        INTEGER NOT NULL,
    created_at         TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

const INSERT_PROVIDER: &str = "INSERT INTO providers
    (identifier, name, credentials, specialties, practice_name,
     address_line1, address_line2, city, state, zip, address_text,
     phone, telehealth, telehealth_details, languages, county, source_page)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

/// One `providers` row per record, one transaction per batch.
///
/// List fields (`specialties`, `languages`) are stored as JSON arrays.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    target: String,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| SinkError::Open(format!("{}: {e}", path.display())))?;
        Self::with_connection(conn, path.display().to_string())
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ":memory:".into())
    }

    fn with_connection(conn: Connection, target: String) -> Result<Self, SinkError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(CREATE_PROVIDERS)?;
        debug!("SQLite sink ready: {}", target);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            target,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Rows in the `providers` table.
    pub async fn count(&self) -> Result<usize, SinkError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))?;
            Ok::<usize, SinkError>(n as usize)
        })
        .await
        .map_err(|e| SinkError::Write(format!("count task failed: {e}")))?
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError> {
        let conn = Arc::clone(&self.conn);
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            insert_batch(&mut conn, &records)
        })
        .await
        .map_err(|e| SinkError::Write(format!("insert task failed: {e}")))?
    }
}

fn insert_batch(conn: &mut Connection, records: &[ProviderRecord]) -> Result<(), SinkError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(INSERT_PROVIDER)?;
        for r in records {
            let specialties = serde_json::to_string(&r.specialties)?;
            let languages = serde_json::to_string(&r.languages)?;
            let (line1, line2, city, state, zip, text) = match &r.address {
                Some(Address::Structured(a)) => (
                    a.line1.as_deref(),
                    a.line2.as_deref(),
                    a.city.as_deref(),
                    a.state.as_deref(),
                    a.zip.as_deref(),
                    None,
                ),
                Some(Address::FreeText(s)) => (None, None, None, None, None, Some(s.as_str())),
                None => (None, None, None, None, None, None),
            };
            stmt.execute(params![
                r.identifier,
                r.name,
                r.credentials,
                specialties,
                r.practice_name,
                line1,
                line2,
                city,
                state,
                zip,
                text,
                r.phone,
                r.telehealth.available,
                r.telehealth.details,
                languages,
                r.county,
                r.source_page as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── JSON Lines ───────────────────────────────────────────────────────────

/// Appends one JSON object per record to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlSink {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Open(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for r in records {
            serde_json::to_writer(&mut buf, r)?;
            buf.push(b'\n');
        }
        let mut file = self.file.lock().await;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

// ── In memory ────────────────────────────────────────────────────────────

/// Keeps every batch it receives.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<ProviderRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch sizes in write order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().iter().map(Vec::len).collect()
    }

    /// Every stored record, in write order.
    pub fn records(&self) -> Vec<ProviderRecord> {
        self.lock().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<ProviderRecord>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError> {
        self.lock().push(records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{StructuredAddress, Telehealth};

    fn record(name: &str, page: usize) -> ProviderRecord {
        ProviderRecord {
            identifier: "100234".into(),
            name: name.into(),
            credentials: Some("MD".into()),
            specialties: vec!["Family Practice".into()],
            practice_name: None,
            address: Some(Address::Structured(StructuredAddress {
                line1: Some("1200 N State St".into()),
                city: Some("Los Angeles".into()),
                state: Some("CA".into()),
                zip: Some("90033".into()),
                ..Default::default()
            })),
            phone: Some("(323) 555-0111".into()),
            telehealth: Telehealth::default(),
            languages: vec!["English".into(), "Spanish".into()],
            county: Some("Los Angeles County".into()),
            source_page: page,
        }
    }

    #[tokio::test]
    async fn sqlite_writes_one_row_per_record() {
        let sink = SqliteSink::in_memory().expect("open");
        sink.store_batch(&[record("Abad, Maria L MD", 1), record("Baker, Tom DO", 1)])
            .await
            .expect("batch 1");
        sink.store_batch(&[record("Abad, Maria L MD", 2)]).await.expect("batch 2");
        assert_eq!(sink.count().await.unwrap(), 3, "sinks do not deduplicate");

        let conn = sink.conn.lock().unwrap();
        let (langs, city): (String, String) = conn
            .query_row(
                "SELECT languages, city FROM providers WHERE source_page = 2",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(langs, r#"["English","Spanish"]"#);
        assert_eq!(city, "Los Angeles");
    }

    #[tokio::test]
    async fn sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.db");
        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.store_batch(&[record("Kim, Ann MD", 4)]).await.unwrap();
        }
        let sink = SqliteSink::open(&path).unwrap();
        assert_eq!(sink.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.jsonl");
        let sink = JsonlSink::open(&path).await.unwrap();
        sink.store_batch(&[record("Kim, Ann MD", 1), record("Lee, Jo NP", 1)]).await.unwrap();
        sink.store_batch(&[record("Ortiz, Eva MD", 2)]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: ProviderRecord = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.name, "Ortiz, Eva MD");
    }

    #[tokio::test]
    async fn memory_sink_keeps_batches() {
        let sink = MemorySink::new();
        sink.store_batch(&[record("A, B MD", 1)]).await.unwrap();
        sink.store_batch(&[record("C, D MD", 1), record("E, F MD", 2)]).await.unwrap();
        assert_eq!(sink.batch_sizes(), vec![1, 2]);
        assert_eq!(sink.len(), 3);
    }
}
