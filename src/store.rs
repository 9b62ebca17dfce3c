use crate::error::StoreError;
use crate::predicate::Predicate;
use crate::query::to_sql;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection};
use std::fmt;
use std::path::{Path, PathBuf};

/// Storage format of `date_received`: UTC, whole seconds. Lexicographic
/// order equals chronological order.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metadata snapshot of one ingested email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub date_received: Option<DateTime<Utc>>,
}

impl fmt::Display for EmailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.id, self.from_address, self.subject)
    }
}

/// Something that can hand out query sessions over stored emails.
pub trait RecordStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError>;
}

/// An open connection to the record store. Released when dropped.
pub trait StoreSession: Send {
    /// Records matching `predicate`, newest first.
    fn query(&mut self, predicate: &Predicate) -> Result<Vec<EmailRecord>, StoreError>;
}

/// SQLite-backed store holding the `emails` table.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY NOT NULL,
                from_address TEXT,
                to_address TEXT,
                subject TEXT,
                date_received TEXT
            )",
            [],
        )?;
        Ok(conn)
    }

    /// Insert records, replacing the metadata of ids already present.
    pub fn upsert(&self, records: &[EmailRecord]) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO emails (id, from_address, to_address, subject, date_received)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    from_address = excluded.from_address,
                    to_address = excluded.to_address,
                    subject = excluded.subject,
                    date_received = excluded.date_received",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.from_address,
                    record.to_address,
                    record.subject,
                    record
                        .date_received
                        .map(|date| date.format(DATE_FORMAT).to_string()),
                ])?;
            }
        }
        tx.commit()?;
        log::info!("Upserted {} email(s) into {}", records.len(), self.path.display());
        Ok(records.len())
    }
}

impl RecordStore for SqliteStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        log::debug!("Opening record store session on {}", self.path.display());
        Ok(Box::new(SqliteSession {
            conn: self.connect()?,
        }))
    }
}

struct SqliteSession {
    conn: Connection,
}

type RawRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl StoreSession for SqliteSession {
    fn query(&mut self, predicate: &Predicate) -> Result<Vec<EmailRecord>, StoreError> {
        let filter = to_sql(predicate);
        let sql = format!(
            "SELECT id, from_address, to_address, subject, date_received
             FROM emails WHERE {} ORDER BY date_received DESC",
            filter.clause
        );
        log::debug!("SQL: {} {:?}", sql, filter.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(filter.params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<RawRow>, _>>()?;

        rows.into_iter().map(into_record).collect()
    }
}

fn into_record(row: RawRow) -> Result<EmailRecord, StoreError> {
    let (id, from_address, to_address, subject, date_received) = row;
    let date_received = match date_received {
        Some(text) => Some(parse_stored_date(&text).ok_or_else(|| StoreError::InvalidDate {
            id: id.clone(),
            value: text.clone(),
        })?),
        None => None,
    };
    Ok(EmailRecord {
        id,
        from_address: from_address.unwrap_or_default(),
        to_address: to_address.unwrap_or_default(),
        subject: subject.unwrap_or_default(),
        date_received,
    })
}

fn parse_stored_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Store over an in-memory list, evaluating predicates directly.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<EmailRecord>,
}

impl MemoryStore {
    pub fn new(records: Vec<EmailRecord>) -> Self {
        Self { records }
    }
}

impl RecordStore for MemoryStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        Ok(Box::new(MemorySession {
            records: &self.records,
        }))
    }
}

struct MemorySession<'a> {
    records: &'a [EmailRecord],
}

impl StoreSession for MemorySession<'_> {
    fn query(&mut self, predicate: &Predicate) -> Result<Vec<EmailRecord>, StoreError> {
        let mut matched: Vec<EmailRecord> = self
            .records
            .iter()
            .filter(|record| predicate.matches(record))
            .cloned()
            .collect();
        // Newest first, undated last, as SQLite orders them.
        matched.sort_by(|a, b| b.date_received.cmp(&a.date_received));
        Ok(matched)
    }
}
