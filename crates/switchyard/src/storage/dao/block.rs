//! 块 DAO - blocks 表
//!
//! `order` 是 SQL 关键字，列名使用 sort_order。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, opt_uuid_text, read_enum, read_json_map, read_opt_uuid, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{Block, BlockId, PageId};
use crate::utils::time;

const COLUMNS: &str =
    "id, page_id, block_type, content, sort_order, parent_block_id, created_at, updated_at";

pub struct BlockDao<'a> {
    conn: &'a Connection,
}

impl<'a> BlockDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, b: &Block) -> Result<()> {
        let sql = r#"
            INSERT INTO blocks (id, page_id, block_type, content, sort_order, parent_block_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#;
        let content = serde_json::to_string(&b.content)?;
        self.conn
            .execute(
                sql,
                params![
                    b.id.to_string(),
                    b.page_id.to_string(),
                    b.block_type.as_str(),
                    content,
                    b.order,
                    opt_uuid_text(b.parent_block_id),
                    time::to_micros(&b.created_at),
                    time::to_micros(&b.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("block {}", b.id)))?;
        Ok(())
    }

    pub fn update(&self, b: &Block) -> Result<usize> {
        let sql = r#"
            UPDATE blocks SET
                page_id = ?2,
                block_type = ?3,
                content = ?4,
                sort_order = ?5,
                parent_block_id = ?6,
                created_at = ?7,
                updated_at = ?8
            WHERE id = ?1
        "#;
        let content = serde_json::to_string(&b.content)?;
        let changed = self.conn.execute(
            sql,
            params![
                b.id.to_string(),
                b.page_id.to_string(),
                b.block_type.as_str(),
                content,
                b.order,
                opt_uuid_text(b.parent_block_id),
                time::to_micros(&b.created_at),
                time::to_micros(&b.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Block>> {
        let sql = format!("SELECT {} FROM blocks WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_block(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_by_page(&self, page: PageId) -> Result<Vec<Block>> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE page_id = ?1 ORDER BY sort_order, created_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![page.to_string()], |row| row_to_block(row))?;
        let mut out = Vec::new();
        for b in rows {
            out.push(b?);
        }
        Ok(out)
    }

    /// 只更新属于该页的块；返回受影响行数
    pub fn set_order(
        &self,
        page: PageId,
        id: BlockId,
        order: i64,
        now: &DateTime<Utc>,
    ) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE blocks SET sort_order = ?3, updated_at = ?4 WHERE id = ?1 AND page_id = ?2",
            params![id.to_string(), page.to_string(), order, time::to_micros(now)],
        )?;
        Ok(changed)
    }
}

fn row_to_block(row: &rusqlite::Row) -> rusqlite::Result<Block> {
    Ok(Block {
        id: BlockId(read_uuid(row, 0)?),
        page_id: PageId(read_uuid(row, 1)?),
        block_type: read_enum(row, 2)?,
        content: read_json_map(row, 3)?,
        order: row.get(4)?,
        parent_block_id: read_opt_uuid(row, 5)?.map(BlockId),
        created_at: read_ts(row, 6)?,
        updated_at: read_ts(row, 7)?,
    })
}
