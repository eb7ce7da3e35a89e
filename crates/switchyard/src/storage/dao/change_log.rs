//! 变更日志 DAO - change_tracking 表

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{read_enum, read_opt_ts, read_ts, read_uuid, sql_limit};
use crate::error::Result;
use crate::storage::change_log::{ChangeOperation, ChangeRecord, ChangeStats};
use crate::storage::{EntityKind, Record, SyncWindow};
use crate::utils::time;

const COLUMNS: &str =
    "id, entity_type, entity_id, operation, changed_at, processed_at, error_message, retry_count, payload";

pub struct ChangeLogDao<'a> {
    conn: &'a Connection,
}

impl<'a> ChangeLogDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        operation: ChangeOperation,
        changed_at: &DateTime<Utc>,
        payload: Option<&Record>,
    ) -> Result<i64> {
        let payload = payload.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO change_tracking (entity_type, entity_id, operation, changed_at, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                entity_id.to_string(),
                operation.as_str(),
                time::to_micros(changed_at),
                payload,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 未处理或带错误的变更，按 id 升序
    pub fn list_unprocessed(&self, limit: usize) -> Result<Vec<ChangeRecord>> {
        let sql = format!(
            "SELECT {} FROM change_tracking WHERE processed_at IS NULL OR error_message != '' \
             ORDER BY id LIMIT ?1",
            COLUMNS
        );
        self.query(&sql, params![sql_limit(limit)])
    }

    pub fn list_in_window(
        &self,
        window: &SyncWindow,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let sql = format!(
            "SELECT {} FROM change_tracking \
             WHERE changed_at >= ?1 AND changed_at < ?2 AND id > ?3 \
             ORDER BY id LIMIT ?4",
            COLUMNS
        );
        self.query(
            &sql,
            params![
                window.since_micros(),
                window.until_micros(),
                after_id,
                sql_limit(limit)
            ],
        )
    }

    pub fn mark_processed(&self, id: i64, now: &DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE change_tracking SET processed_at = ?2, error_message = '' WHERE id = ?1",
            params![id, time::to_micros(now)],
        )?)
    }

    pub fn mark_error(&self, id: i64, message: &str) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE change_tracking SET error_message = ?2, retry_count = retry_count + 1 WHERE id = ?1",
            params![id, message],
        )?)
    }

    pub fn stats(&self) -> Result<ChangeStats> {
        let count = |filter: &str| -> Result<u64> {
            let sql = format!("SELECT COUNT(*) FROM change_tracking WHERE {}", filter);
            let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        let oldest_pending: Option<i64> = self.conn.query_row(
            "SELECT MIN(changed_at) FROM change_tracking WHERE processed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        let latest_change: Option<i64> =
            self.conn
                .query_row("SELECT MAX(changed_at) FROM change_tracking", [], |row| row.get(0))?;

        Ok(ChangeStats {
            total: count("1 = 1")?,
            processed: count("processed_at IS NOT NULL AND error_message = ''")?,
            pending: count("processed_at IS NULL")?,
            failed: count("error_message != ''")?,
            oldest_pending: oldest_pending.and_then(time::from_micros),
            latest_change: latest_change.and_then(time::from_micros),
        })
    }

    pub fn purge_processed(&self, before: &DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM change_tracking \
             WHERE processed_at IS NOT NULL AND processed_at < ?1 AND error_message = ''",
            params![time::to_micros(before)],
        )?)
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ChangeRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| row_to_change(row))?;
        let mut out = Vec::new();
        for change in rows {
            out.push(change?);
        }
        Ok(out)
    }
}

fn row_to_change(row: &rusqlite::Row) -> rusqlite::Result<ChangeRecord> {
    let payload = match row.get::<_, Option<String>>(8)? {
        Some(text) => Some(
            serde_json::from_str::<Record>(&text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    Ok(ChangeRecord {
        id: row.get(0)?,
        kind: read_enum(row, 1)?,
        entity_id: read_uuid(row, 2)?,
        operation: read_enum(row, 3)?,
        changed_at: read_ts(row, 4)?,
        processed_at: read_opt_ts(row, 5)?,
        error_message: row.get(6)?,
        retry_count: row.get::<_, i64>(7)?.max(0) as u32,
        payload,
    })
}
