//! 工作区 DAO - workspaces 表

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{UserId, Workspace, WorkspaceId};
use crate::utils::time;

const COLUMNS: &str = "id, name, owner_id, created_at, updated_at";

pub struct WorkspaceDao<'a> {
    conn: &'a Connection,
}

impl<'a> WorkspaceDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, w: &Workspace) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO workspaces (id, name, owner_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    w.id.to_string(),
                    w.name,
                    w.owner_id.to_string(),
                    time::to_micros(&w.created_at),
                    time::to_micros(&w.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("workspace {}", w.id)))?;
        Ok(())
    }

    pub fn update(&self, w: &Workspace) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE workspaces SET name = ?2, owner_id = ?3, created_at = ?4, updated_at = ?5 WHERE id = ?1",
            params![
                w.id.to_string(),
                w.name,
                w.owner_id.to_string(),
                time::to_micros(&w.created_at),
                time::to_micros(&w.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Workspace>> {
        let sql = format!("SELECT {} FROM workspaces WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_workspace(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_by_owner(&self, owner: UserId) -> Result<Vec<Workspace>> {
        let sql = format!(
            "SELECT {} FROM workspaces WHERE owner_id = ?1 ORDER BY created_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner.to_string()], |row| row_to_workspace(row))?;
        let mut out = Vec::new();
        for w in rows {
            out.push(w?);
        }
        Ok(out)
    }
}

fn row_to_workspace(row: &rusqlite::Row) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId(read_uuid(row, 0)?),
        name: row.get(1)?,
        owner_id: UserId(read_uuid(row, 2)?),
        created_at: read_ts(row, 3)?,
        updated_at: read_ts(row, 4)?,
    })
}
