//! Thread-aggregate persistence.
//!
//! The propagator only needs per-thread reads, a same-company lookup and a
//! write, all inside one transaction. Writes staged in a transaction become
//! visible only when the closure returns `Ok`.

use crate::model::{Label, ThreadAggregate};
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub trait AggregateTx {
    fn get(&mut self, thread_id: &str) -> anyhow::Result<Option<ThreadAggregate>>;

    /// Aggregates of other threads whose company matches case-insensitively,
    /// ordered by thread id.
    fn find_by_company(
        &mut self,
        company: &str,
        exclude_thread: &str,
    ) -> anyhow::Result<Vec<ThreadAggregate>>;

    fn put(&mut self, aggregate: &ThreadAggregate) -> anyhow::Result<()>;
}

pub trait AggregateStore: Send + Sync {
    /// Runs `f` as one atomic read-modify-write. An `Err` from `f` discards
    /// every staged write.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn AggregateTx) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>;

    fn get(&self, thread_id: &str) -> anyhow::Result<Option<ThreadAggregate>> {
        let mut found = None;
        self.transaction(&mut |tx: &mut dyn AggregateTx| {
            found = tx.get(thread_id)?;
            Ok(())
        })?;
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    aggregates: Mutex<HashMap<String, ThreadAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryTx<'a> {
    committed: &'a HashMap<String, ThreadAggregate>,
    staged: HashMap<String, ThreadAggregate>,
}

impl AggregateTx for MemoryTx<'_> {
    fn get(&mut self, thread_id: &str) -> anyhow::Result<Option<ThreadAggregate>> {
        Ok(self
            .staged
            .get(thread_id)
            .or_else(|| self.committed.get(thread_id))
            .cloned())
    }

    fn find_by_company(
        &mut self,
        company: &str,
        exclude_thread: &str,
    ) -> anyhow::Result<Vec<ThreadAggregate>> {
        let wanted = company.to_lowercase();
        let matches = self
            .committed
            .keys()
            .chain(self.staged.keys())
            .filter(|id| id.as_str() != exclude_thread)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.staged.get(id).or_else(|| self.committed.get(id)))
            .filter(|agg| {
                agg.company
                    .as_deref()
                    .is_some_and(|c| c.to_lowercase() == wanted)
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    fn put(&mut self, aggregate: &ThreadAggregate) -> anyhow::Result<()> {
        self.staged
            .insert(aggregate.thread_id.clone(), aggregate.clone());
        Ok(())
    }
}

impl AggregateStore for MemoryStore {
    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn AggregateTx) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let staged = {
            let mut tx = MemoryTx {
                committed: &*guard,
                staged: HashMap::new(),
            };
            f(&mut tx)?;
            tx.staged
        };
        guard.extend(staged);
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open aggregate database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS thread_aggregates (
                thread_id TEXT PRIMARY KEY,
                company TEXT,
                job_title TEXT,
                job_id TEXT,
                label TEXT,
                confidence REAL NOT NULL DEFAULT 0,
                sent_date TEXT,
                response_date TEXT,
                rejection_date TEXT,
                interview_date TEXT,
                prescreen_date TEXT,
                follow_up_date TEXT,
                reviewed INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("Failed to create thread_aggregates table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_thread_aggregates_company
             ON thread_aggregates (company COLLATE NOCASE)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT thread_id, company, job_title, job_id, label, confidence,
        sent_date, response_date, rejection_date, interview_date, prescreen_date,
        follow_up_date, reviewed
     FROM thread_aggregates";

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl AggregateTx for SqliteTx<'_> {
    fn get(&mut self, thread_id: &str) -> anyhow::Result<Option<ThreadAggregate>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE thread_id = ?1"))?;
        let aggregate = stmt
            .query_row(params![thread_id], row_to_aggregate)
            .optional()
            .with_context(|| format!("Failed to load aggregate for thread {thread_id}"))?;
        Ok(aggregate)
    }

    fn find_by_company(
        &mut self,
        company: &str,
        exclude_thread: &str,
    ) -> anyhow::Result<Vec<ThreadAggregate>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE company = ?1 COLLATE NOCASE AND thread_id != ?2 ORDER BY thread_id"
        ))?;
        let aggregates = stmt
            .query_map(params![company, exclude_thread], row_to_aggregate)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to look up aggregates for company {company}"))?;
        Ok(aggregates)
    }

    fn put(&mut self, aggregate: &ThreadAggregate) -> anyhow::Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO thread_aggregates
                 (thread_id, company, job_title, job_id, label, confidence, sent_date,
                  response_date, rejection_date, interview_date, prescreen_date,
                  follow_up_date, reviewed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    aggregate.thread_id,
                    aggregate.company,
                    aggregate.job_title,
                    aggregate.job_id,
                    aggregate.label.map(|l| l.as_str()),
                    aggregate.confidence,
                    format_date(aggregate.sent_date),
                    format_date(aggregate.response_date),
                    format_date(aggregate.rejection_date),
                    format_date(aggregate.interview_date),
                    format_date(aggregate.prescreen_date),
                    format_date(aggregate.follow_up_date),
                    aggregate.reviewed,
                ],
            )
            .with_context(|| format!("Failed to store aggregate for thread {}", aggregate.thread_id))?;
        Ok(())
    }
}

impl AggregateStore for SqliteStore {
    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn AggregateTx) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin aggregate transaction")?;
        {
            let mut handle = SqliteTx { conn: &tx };
            f(&mut handle)?;
        }
        tx.commit().context("Failed to commit aggregate transaction")?;
        Ok(())
    }
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let value: Option<String> = row.get(idx)?;
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn row_to_aggregate(row: &Row<'_>) -> rusqlite::Result<ThreadAggregate> {
    let label = row
        .get::<_, Option<String>>(4)?
        .map(|s| {
            s.parse::<Label>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(ThreadAggregate {
        thread_id: row.get(0)?,
        company: row.get(1)?,
        job_title: row.get(2)?,
        job_id: row.get(3)?,
        label,
        confidence: row.get(5)?,
        sent_date: date_column(row, 6)?,
        response_date: date_column(row, 7)?,
        rejection_date: date_column(row, 8)?,
        interview_date: date_column(row, 9)?,
        prescreen_date: date_column(row, 10)?,
        follow_up_date: date_column(row, 11)?,
        reviewed: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(thread_id: &str, company: &str) -> ThreadAggregate {
        ThreadAggregate {
            company: Some(company.to_string()),
            label: Some(Label::JobApplication),
            confidence: 0.95,
            sent_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..ThreadAggregate::new(thread_id)
        }
    }

    fn stores() -> Vec<Box<dyn AggregateStore>> {
        vec![
            Box::new(MemoryStore::new()),
            Box::new(SqliteStore::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn test_put_get_round_trip() {
        for store in stores() {
            let original = aggregate("t-1", "Acme Corp");
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| tx.put(&original))
                .unwrap();
            assert_eq!(store.get("t-1").unwrap(), Some(original.clone()));
            assert_eq!(store.get("missing").unwrap(), None);
        }
    }

    #[test]
    fn test_failed_transaction_discards_writes() {
        for store in stores() {
            let result = store.transaction(&mut |tx: &mut dyn AggregateTx| {
                tx.put(&aggregate("t-2", "Acme Corp"))?;
                anyhow::bail!("abort")
            });
            assert!(result.is_err());
            assert_eq!(store.get("t-2").unwrap(), None);
        }
    }

    #[test]
    fn test_find_by_company_is_case_insensitive() {
        for store in stores() {
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| {
                    tx.put(&aggregate("t-b", "Acme Corp"))?;
                    tx.put(&aggregate("t-a", "ACME CORP"))?;
                    tx.put(&aggregate("t-c", "Globex"))
                })
                .unwrap();

            let mut found = Vec::new();
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| {
                    found = tx.find_by_company("acme corp", "t-b")?;
                    Ok(())
                })
                .unwrap();
            let ids: Vec<&str> = found.iter().map(|a| a.thread_id.as_str()).collect();
            assert_eq!(ids, vec!["t-a"]);
        }
    }

    #[test]
    fn test_staged_writes_visible_inside_transaction() {
        for store in stores() {
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| {
                    tx.put(&aggregate("t-3", "Initech"))?;
                    assert!(tx.get("t-3")?.is_some());
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn test_sqlite_file_persists() {
        let path = std::env::temp_dir().join(format!("jobmail-store-{}.db", std::process::id()));
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| tx.put(&aggregate("t-9", "Umbrella")))
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("t-9").unwrap().and_then(|a| a.company),
            Some("Umbrella".to_string())
        );
        std::fs::remove_file(&path).ok();
    }
}
