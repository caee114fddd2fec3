//! SQLite datastore
//!
//! Durable single-node storage for hosts, labels, queries, campaigns and
//! executions:
//! - WAL journal for crash recovery and concurrent readers
//! - Unique (campaign_id, host_id) constraint backing execution idempotence
//! - Conditional updates so a terminal execution is never overwritten and
//!   an execution of a closed campaign never changes
//!
//! Timestamps and durations are stored as milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::datastore::{Datastore, DatastoreError, DatastoreResult, ExecutionUpdate};
use crate::types::{
    Campaign, CampaignStatus, Execution, ExecutionStatus, Host, HostDetails, Label,
    LabelQueryExecution, NewCampaign, Query, Target, TargetType,
};

const HOST_COLUMNS: &str = "id, osquery_host_id, node_key, hostname, platform, os_version, \
     osquery_version, created_at, seen_time, detail_updated_at";

const CAMPAIGN_COLUMNS: &str = "id, query_id, status, user_id, max_duration_ms, created_at";

const EXECUTION_COLUMNS: &str =
    "id, campaign_id, host_id, status, error, duration_ms, created_at";

/// Datastore backed by a single SQLite connection.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Create or open a database file.
    pub fn open(path: impl AsRef<Path>) -> DatastoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening SQLite datastore");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// Private database that disappears with the value.
    pub fn open_in_memory() -> DatastoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DatastoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> DatastoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                osquery_host_id TEXT NOT NULL UNIQUE,
                node_key TEXT UNIQUE,
                hostname TEXT NOT NULL DEFAULT '',
                platform TEXT NOT NULL DEFAULT '',
                os_version TEXT NOT NULL DEFAULT '',
                osquery_version TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                seen_time INTEGER NOT NULL,
                detail_updated_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                query TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS label_query_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                label_id INTEGER NOT NULL,
                matches INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lqe_label ON label_query_executions(label_id);
            CREATE INDEX IF NOT EXISTS idx_lqe_host ON label_query_executions(host_id);

            CREATE TABLE IF NOT EXISTS queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                query TEXT NOT NULL,
                saved INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                max_duration_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_campaign_status ON campaigns(status);

            CREATE TABLE IF NOT EXISTS campaign_targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                target_type TEXT NOT NULL,
                target_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_targets_campaign ON campaign_targets(campaign_id);

            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL,
                host_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (campaign_id, host_id)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_host(conn: &Connection, id: u64) -> DatastoreResult<Option<Host>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id as i64], host_from_row)
            .optional()?)
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn corrupt(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(DatastoreError::Corrupt(message)),
    )
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<Host> {
    Ok(Host {
        id: id(row, 0)?,
        osquery_host_id: row.get(1)?,
        node_key: row.get(2)?,
        hostname: row.get(3)?,
        platform: row.get(4)?,
        os_version: row.get(5)?,
        osquery_version: row.get(6)?,
        created_at: timestamp(row, 7)?,
        seen_time: timestamp(row, 8)?,
        detail_updated_at: optional_timestamp(row, 9)?,
    })
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let status: String = row.get(2)?;
    Ok(Campaign {
        id: id(row, 0)?,
        query_id: id(row, 1)?,
        status: CampaignStatus::parse(&status)
            .ok_or_else(|| corrupt(2, format!("campaign status {status}")))?,
        user_id: id(row, 3)?,
        max_duration: Duration::from_millis(row.get::<_, i64>(4)? as u64),
        created_at: timestamp(row, 5)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(3)?;
    Ok(Execution {
        id: id(row, 0)?,
        campaign_id: id(row, 1)?,
        host_id: id(row, 2)?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| corrupt(3, format!("execution status {status}")))?,
        error: row.get(4)?,
        execution_duration: Duration::from_millis(row.get::<_, i64>(5)? as u64),
        created_at: timestamp(row, 6)?,
    })
}

fn label_execution_from_row(row: &Row<'_>) -> rusqlite::Result<LabelQueryExecution> {
    Ok(LabelQueryExecution {
        host_id: id(row, 0)?,
        label_id: id(row, 1)?,
        matches: row.get(2)?,
        updated_at: timestamp(row, 3)?,
    })
}

impl Datastore for SqliteDatastore {
    fn enroll_host(
        &self,
        osquery_host_id: &str,
        node_key: &str,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Host> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM hosts WHERE osquery_host_id = ?1",
                params![osquery_host_id],
                |row| row.get(0),
            )
            .optional()?;

        let host_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO hosts (osquery_host_id, created_at, seen_time) \
                     VALUES (?1, ?2, ?2)",
                    params![osquery_host_id, millis(now)],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.execute(
            "UPDATE hosts SET node_key = ?1 WHERE id = ?2",
            params![node_key, host_id],
        )?;
        tx.commit()?;

        debug!(host_id, osquery_host_id, "Host enrolled");

        Self::load_host(&conn, host_id as u64)?
            .ok_or_else(|| DatastoreError::not_found("host", host_id))
    }

    fn save_host(&self, mut host: Host) -> DatastoreResult<Host> {
        let conn = self.lock();
        if host.id == 0 {
            conn.execute(
                r#"
                INSERT INTO hosts (
                    osquery_host_id, node_key, hostname, platform, os_version,
                    osquery_version, created_at, seen_time, detail_updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    host.osquery_host_id,
                    host.node_key,
                    host.hostname,
                    host.platform,
                    host.os_version,
                    host.osquery_version,
                    millis(host.created_at),
                    millis(host.seen_time),
                    host.detail_updated_at.map(millis),
                ],
            )?;
            host.id = conn.last_insert_rowid() as u64;
        } else {
            let changed = conn.execute(
                r#"
                UPDATE hosts SET
                    osquery_host_id = ?1, node_key = ?2, hostname = ?3, platform = ?4,
                    os_version = ?5, osquery_version = ?6, created_at = ?7,
                    seen_time = ?8, detail_updated_at = ?9
                WHERE id = ?10
                "#,
                params![
                    host.osquery_host_id,
                    host.node_key,
                    host.hostname,
                    host.platform,
                    host.os_version,
                    host.osquery_version,
                    millis(host.created_at),
                    millis(host.seen_time),
                    host.detail_updated_at.map(millis),
                    host.id as i64,
                ],
            )?;
            if changed == 0 {
                return Err(DatastoreError::not_found("host", host.id));
            }
        }
        Ok(host)
    }

    fn host(&self, id: u64) -> DatastoreResult<Option<Host>> {
        Self::load_host(&self.lock(), id)
    }

    fn host_by_node_key(&self, node_key: &str) -> DatastoreResult<Option<Host>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE node_key = ?1");
        Ok(self
            .lock()
            .query_row(&sql, params![node_key], host_from_row)
            .optional()?)
    }

    fn hosts_by_ids(&self, ids: &[u64]) -> DatastoreResult<Vec<Host>> {
        let conn = self.lock();
        let mut hosts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(host) = Self::load_host(&conn, *id)? {
                hosts.push(host);
            }
        }
        Ok(hosts)
    }

    fn mark_host_seen(&self, host_id: u64, now: DateTime<Utc>) -> DatastoreResult<()> {
        let changed = self.lock().execute(
            "UPDATE hosts SET seen_time = ?1 WHERE id = ?2",
            params![millis(now), host_id as i64],
        )?;
        if changed == 0 {
            return Err(DatastoreError::not_found("host", host_id));
        }
        Ok(())
    }

    fn update_host_details(
        &self,
        host_id: u64,
        details: &HostDetails,
        now: DateTime<Utc>,
    ) -> DatastoreResult<()> {
        let changed = self.lock().execute(
            r#"
            UPDATE hosts SET
                hostname = COALESCE(?1, hostname),
                platform = COALESCE(?2, platform),
                os_version = COALESCE(?3, os_version),
                osquery_version = COALESCE(?4, osquery_version),
                detail_updated_at = ?5
            WHERE id = ?6
            "#,
            params![
                details.hostname,
                details.platform,
                details.os_version,
                details.osquery_version,
                millis(now),
                host_id as i64,
            ],
        )?;
        if changed == 0 {
            return Err(DatastoreError::not_found("host", host_id));
        }
        Ok(())
    }

    fn new_label(&self, name: &str, query: &str, now: DateTime<Utc>) -> DatastoreResult<Label> {
        let conn = self.lock();
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM labels WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(DatastoreError::Duplicate {
                kind: "label",
                id: name.to_string(),
            });
        }
        conn.execute(
            "INSERT INTO labels (name, query, created_at) VALUES (?1, ?2, ?3)",
            params![name, query, millis(now)],
        )?;
        Ok(Label {
            id: conn.last_insert_rowid() as u64,
            name: name.to_string(),
            query: query.to_string(),
            created_at: now,
        })
    }

    fn labels(&self) -> DatastoreResult<Vec<Label>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, query, created_at FROM labels ORDER BY id")?;
        let labels = stmt
            .query_map([], |row| {
                Ok(Label {
                    id: id(row, 0)?,
                    name: row.get(1)?,
                    query: row.get(2)?,
                    created_at: timestamp(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    fn record_label_query_execution(&self, row: LabelQueryExecution) -> DatastoreResult<()> {
        self.lock().execute(
            "INSERT INTO label_query_executions (host_id, label_id, matches, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                row.host_id as i64,
                row.label_id as i64,
                row.matches,
                millis(row.updated_at)
            ],
        )?;
        Ok(())
    }

    fn label_query_executions(&self, label_id: u64) -> DatastoreResult<Vec<LabelQueryExecution>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT host_id, label_id, matches, updated_at FROM label_query_executions \
             WHERE label_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![label_id as i64], label_execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn label_query_executions_for_host(
        &self,
        host_id: u64,
    ) -> DatastoreResult<Vec<LabelQueryExecution>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT host_id, label_id, matches, updated_at FROM label_query_executions \
             WHERE host_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![host_id as i64], label_execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn new_query(
        &self,
        name: &str,
        query: &str,
        saved: bool,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Query> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO queries (name, query, saved, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, query, saved, millis(now)],
        )?;
        Ok(Query {
            id: conn.last_insert_rowid() as u64,
            name: name.to_string(),
            query: query.to_string(),
            saved,
            created_at: now,
        })
    }

    fn query(&self, query_id: u64) -> DatastoreResult<Option<Query>> {
        Ok(self
            .lock()
            .query_row(
                "SELECT id, name, query, saved, created_at FROM queries WHERE id = ?1",
                params![query_id as i64],
                |row| {
                    Ok(Query {
                        id: id(row, 0)?,
                        name: row.get(1)?,
                        query: row.get(2)?,
                        saved: row.get(3)?,
                        created_at: timestamp(row, 4)?,
                    })
                },
            )
            .optional()?)
    }

    fn new_campaign(&self, campaign: NewCampaign) -> DatastoreResult<Campaign> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO campaigns (query_id, status, user_id, max_duration_ms, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                campaign.query_id as i64,
                CampaignStatus::Running.as_str(),
                campaign.user_id as i64,
                campaign.max_duration.as_millis() as i64,
                millis(campaign.created_at),
            ],
        )?;
        Ok(Campaign {
            id: conn.last_insert_rowid() as u64,
            query_id: campaign.query_id,
            status: CampaignStatus::Running,
            user_id: campaign.user_id,
            max_duration: campaign.max_duration,
            created_at: campaign.created_at,
        })
    }

    fn campaign(&self, campaign_id: u64) -> DatastoreResult<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
        Ok(self
            .lock()
            .query_row(&sql, params![campaign_id as i64], campaign_from_row)
            .optional()?)
    }

    fn running_campaigns(&self) -> DatastoreResult<Vec<Campaign>> {
        let conn = self.lock();
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let campaigns = stmt
            .query_map(params![CampaignStatus::Running.as_str()], campaign_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(campaigns)
    }

    fn set_campaign_status(&self, campaign_id: u64, status: CampaignStatus) -> DatastoreResult<()> {
        let changed = self.lock().execute(
            "UPDATE campaigns SET status = ?1 WHERE id = ?2",
            params![status.as_str(), campaign_id as i64],
        )?;
        if changed == 0 {
            return Err(DatastoreError::not_found("campaign", campaign_id));
        }
        Ok(())
    }

    fn new_campaign_target(&self, campaign_id: u64, target: Target) -> DatastoreResult<()> {
        let conn = self.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM campaigns WHERE id = ?1",
                params![campaign_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(DatastoreError::not_found("campaign", campaign_id));
        }
        conn.execute(
            "INSERT INTO campaign_targets (campaign_id, target_type, target_id) \
             VALUES (?1, ?2, ?3)",
            params![
                campaign_id as i64,
                target.target_type.as_str(),
                target.target_id as i64
            ],
        )?;
        Ok(())
    }

    fn campaign_targets(&self, campaign_id: u64) -> DatastoreResult<Vec<Target>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT target_type, target_id FROM campaign_targets \
             WHERE campaign_id = ?1 ORDER BY id",
        )?;
        let targets = stmt
            .query_map(params![campaign_id as i64], |row| {
                let kind: String = row.get(0)?;
                Ok(Target {
                    target_type: TargetType::parse(&kind)
                        .ok_or_else(|| corrupt(0, format!("target type {kind}")))?,
                    target_id: id(row, 1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    fn get_or_create_execution(
        &self,
        campaign_id: u64,
        host_id: u64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> DatastoreResult<Execution> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO executions (campaign_id, host_id, status, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                campaign_id as i64,
                host_id as i64,
                status.as_str(),
                millis(now)
            ],
        )?;
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE campaign_id = ?1 AND host_id = ?2"
        );
        let execution = tx.query_row(
            &sql,
            params![campaign_id as i64, host_id as i64],
            execution_from_row,
        )?;
        tx.commit()?;
        Ok(execution)
    }

    fn execution(&self, execution_id: u64) -> DatastoreResult<Option<Execution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1");
        Ok(self
            .lock()
            .query_row(&sql, params![execution_id as i64], execution_from_row)
            .optional()?)
    }

    fn update_execution(
        &self,
        execution_id: u64,
        status: ExecutionStatus,
        error: Option<String>,
        duration: Duration,
    ) -> DatastoreResult<ExecutionUpdate> {
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE executions SET status = ?1, error = ?2, duration_ms = ?3
            WHERE id = ?4 AND status NOT IN (?5, ?6)
              AND EXISTS (
                SELECT 1 FROM campaigns
                WHERE campaigns.id = executions.campaign_id AND campaigns.status = ?7
              )
            "#,
            params![
                status.as_str(),
                error,
                duration.as_millis() as i64,
                execution_id as i64,
                ExecutionStatus::Succeeded.as_str(),
                ExecutionStatus::Failed.as_str(),
                CampaignStatus::Running.as_str(),
            ],
        )?;
        if changed > 0 {
            return Ok(ExecutionUpdate::Updated);
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM executions WHERE id = ?1",
                params![execution_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        let current =
            current.ok_or_else(|| DatastoreError::not_found("execution", execution_id))?;
        match ExecutionStatus::parse(&current) {
            Some(s) if s.is_terminal() => Ok(ExecutionUpdate::AlreadyTerminal),
            Some(_) => Ok(ExecutionUpdate::CampaignFinished),
            None => Err(DatastoreError::Corrupt(format!(
                "execution {execution_id} has status {current:?}"
            ))),
        }
    }

    fn executions_for_campaign(&self, campaign_id: u64) -> DatastoreResult<Vec<Execution>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE campaign_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let executions = stmt
            .query_map(params![campaign_id as i64], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }
}
