//! 评论 DAO - comments 表

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, read_opt_ts, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{BlockId, Comment, CommentId, UserId};
use crate::utils::time;

const COLUMNS: &str = "id, block_id, user_id, content, resolved_at, created_at, updated_at";

pub struct CommentDao<'a> {
    conn: &'a Connection,
}

impl<'a> CommentDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, c: &Comment) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO comments (id, block_id, user_id, content, resolved_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    c.id.to_string(),
                    c.block_id.to_string(),
                    c.user_id.to_string(),
                    c.content,
                    c.resolved_at.as_ref().map(time::to_micros),
                    time::to_micros(&c.created_at),
                    time::to_micros(&c.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("comment {}", c.id)))?;
        Ok(())
    }

    pub fn update(&self, c: &Comment) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE comments SET block_id = ?2, user_id = ?3, content = ?4, resolved_at = ?5, \
             created_at = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                c.id.to_string(),
                c.block_id.to_string(),
                c.user_id.to_string(),
                c.content,
                c.resolved_at.as_ref().map(time::to_micros),
                time::to_micros(&c.created_at),
                time::to_micros(&c.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_comment(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_by_block(&self, block: BlockId) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {} FROM comments WHERE block_id = ?1 ORDER BY created_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![block.to_string()], |row| row_to_comment(row))?;
        let mut out = Vec::new();
        for c in rows {
            out.push(c?);
        }
        Ok(out)
    }

    /// resolved_at = updated_at = now
    pub fn resolve(&self, id: CommentId, now: &DateTime<Utc>) -> Result<usize> {
        let micros = time::to_micros(now);
        let changed = self.conn.execute(
            "UPDATE comments SET resolved_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), micros],
        )?;
        Ok(changed)
    }
}

fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: CommentId(read_uuid(row, 0)?),
        block_id: BlockId(read_uuid(row, 1)?),
        user_id: UserId(read_uuid(row, 2)?),
        content: row.get(3)?,
        resolved_at: read_opt_ts(row, 4)?,
        created_at: read_ts(row, 5)?,
        updated_at: read_ts(row, 6)?,
    })
}
