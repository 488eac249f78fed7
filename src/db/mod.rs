use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{DispatchRecord, PaymentClass, Target};

pub type Entries = BTreeMap<String, DispatchRecord>;

/// Durable home of the idempotency entries.
pub trait StateBackend: Send {
    fn load(&mut self) -> Result<Entries, StoreError>;

    /// Make `pending` durable. `all` is the complete in-memory map, pending keys included.
    fn persist(&mut self, all: &Entries, pending: &[String]) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

/// Whole-map JSON file, replaced atomically through a sibling temp file.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateBackend for JsonFileBackend {
    fn load(&mut self) -> Result<Entries, StoreError> {
        if !self.path.exists() {
            return Ok(Entries::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Entries::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn persist(&mut self, all: &Entries, _pending: &[String]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&serde_json::to_vec_pretty(all)?)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_dispatched_events.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_dispatched_events.sql"
                )),
            ),
            (
                "002_add_ledger_row.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_add_ledger_row.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn get_dispatched(&self) -> SqlResult<Vec<(String, Option<DispatchRecord>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, target, invoice_id, reference, amount, class, dispatched_at, ledger_row
             FROM dispatched_events",
        )?;

        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let target: String = row.get(1)?;
            let invoice_id: String = row.get(2)?;
            let reference: Option<i64> = row.get(3)?;
            let amount: String = row.get(4)?;
            let class: String = row.get(5)?;
            let dispatched_at: String = row.get(6)?;
            let ledger_row: Option<i64> = row.get(7)?;
            let record = decode_record(
                &target,
                invoice_id,
                reference,
                &amount,
                &class,
                &dispatched_at,
            )
            .map(|record| DispatchRecord {
                ledger_row: ledger_row.and_then(|r| usize::try_from(r).ok()),
                ..record
            });
            Ok((key, record))
        })?;

        rows.collect()
    }

    pub fn insert_dispatched(&mut self, records: &[(&str, &DispatchRecord)]) -> SqlResult<()> {
        let tx = self.conn.transaction()?;
        for (key, record) in records {
            tx.execute(
                "INSERT OR REPLACE INTO dispatched_events (
                    key, target, invoice_id, reference, amount, class, dispatched_at, ledger_row
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key,
                    record.target.as_str(),
                    record.invoice_id,
                    record.reference.map(|r| r as i64),
                    record.amount.to_string(),
                    record.class.as_str(),
                    record.dispatched_at.to_rfc3339(),
                    record.ledger_row.map(|r| r as i64)
                ],
            )?;
        }
        tx.commit()
    }
}

fn decode_record(
    target: &str,
    invoice_id: String,
    reference: Option<i64>,
    amount: &str,
    class: &str,
    dispatched_at: &str,
) -> Option<DispatchRecord> {
    Some(DispatchRecord {
        target: Target::parse(target)?,
        invoice_id,
        reference: reference.and_then(|r| u64::try_from(r).ok()),
        amount: Decimal::from_str(amount).ok()?,
        class: PaymentClass::parse(class)?,
        dispatched_at: DateTime::parse_from_rfc3339(dispatched_at)
            .ok()?
            .with_timezone(&Utc),
        ledger_row: None,
    })
}

/// SQLite file with one row per dispatched key; each flush is one transaction.
pub struct SqliteBackend {
    path: PathBuf,
    db: Option<Database>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: None,
        }
    }

    fn database(&mut self) -> Result<&mut Database, StoreError> {
        let db = match self.db.take() {
            Some(db) => db,
            None => Database::new(&self.path)?,
        };
        Ok(self.db.insert(db))
    }
}

impl StateBackend for SqliteBackend {
    fn load(&mut self) -> Result<Entries, StoreError> {
        let rows = self.database()?.get_dispatched()?;
        let mut entries = Entries::new();
        for (key, record) in rows {
            match record {
                Some(record) => {
                    entries.insert(key, record);
                }
                None => warn!(key = %key, "unreadable dispatched row ignored"),
            }
        }
        Ok(entries)
    }

    fn persist(&mut self, all: &Entries, pending: &[String]) -> Result<(), StoreError> {
        let records: Vec<(&str, &DispatchRecord)> = pending
            .iter()
            .filter_map(|key| all.get(key).map(|record| (key.as_str(), record)))
            .collect();
        self.database()?.insert_dispatched(&records)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// Set of already-dispatched event keys; the only guard against duplicate side effects across runs.
pub struct IdempotencyStore {
    backend: Box<dyn StateBackend>,
    entries: Entries,
    pending: Vec<String>,
}

impl IdempotencyStore {
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self {
            backend,
            entries: Entries::new(),
            pending: Vec::new(),
        }
    }

    /// Backend chosen from the file extension: `.sqlite`/`.db` use SQLite, anything else JSON.
    pub fn open(path: &Path) -> Self {
        let backend: Box<dyn StateBackend> = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("sqlite") || ext.eq_ignore_ascii_case("db") => {
                Box::new(SqliteBackend::new(path))
            }
            _ => Box::new(JsonFileBackend::new(path)),
        };
        let mut store = Self::new(backend);
        store.load();
        store
    }

    /// Replace the in-memory view with the durable one. Failures leave the store empty.
    pub fn load(&mut self) {
        self.pending.clear();
        match self.backend.load() {
            Ok(entries) => {
                info!(state = %self.backend.describe(), entries = entries.len(), "idempotency store loaded");
                self.entries = entries;
            }
            Err(err) => {
                warn!(state = %self.backend.describe(), error = %err, "idempotency store unreadable, starting empty");
                self.entries = Entries::new();
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DispatchRecord> {
        self.entries.get(key)
    }

    pub fn mark(&mut self, key: &str, record: DispatchRecord) {
        debug!(key, "idempotency key marked");
        self.entries.insert(key.to_string(), record);
        if !self.pending.iter().any(|k| k == key) {
            self.pending.push(key.to_string());
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write pending marks. Returns whether anything was written.
    pub fn flush(&mut self) -> Result<bool, StoreError> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        self.backend.persist(&self.entries, &self.pending)?;
        debug!(state = %self.backend.describe(), written = self.pending.len(), "idempotency store flushed");
        self.pending.clear();
        Ok(true)
    }
}
