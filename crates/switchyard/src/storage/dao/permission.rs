//! 权限 DAO - permissions 表

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, read_enum, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{Permission, PermissionId, ResourceType, UserId};
use crate::utils::time;

const COLUMNS: &str =
    "id, resource_type, resource_id, user_id, permission_level, created_at, updated_at";

pub struct PermissionDao<'a> {
    conn: &'a Connection,
}

impl<'a> PermissionDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, p: &Permission) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO permissions (id, resource_type, resource_id, user_id, permission_level, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.id.to_string(),
                    p.resource_type.as_str(),
                    p.resource_id.to_string(),
                    p.user_id.to_string(),
                    p.level.as_str(),
                    time::to_micros(&p.created_at),
                    time::to_micros(&p.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("permission {}", p.id)))?;
        Ok(())
    }

    pub fn update(&self, p: &Permission) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE permissions SET resource_type = ?2, resource_id = ?3, user_id = ?4, \
             permission_level = ?5, created_at = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                p.id.to_string(),
                p.resource_type.as_str(),
                p.resource_id.to_string(),
                p.user_id.to_string(),
                p.level.as_str(),
                time::to_micros(&p.created_at),
                time::to_micros(&p.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        let sql = format!("SELECT {} FROM permissions WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_permission(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_on_resource(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Result<Vec<Permission>> {
        let sql = format!(
            "SELECT {} FROM permissions WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY created_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![resource_type.as_str(), resource_id.to_string()],
            |row| row_to_permission(row),
        )?;
        let mut out = Vec::new();
        for p in rows {
            out.push(p?);
        }
        Ok(out)
    }

    pub fn list_of_user(&self, user: UserId) -> Result<Vec<Permission>> {
        let sql = format!(
            "SELECT {} FROM permissions WHERE user_id = ?1 ORDER BY created_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user.to_string()], |row| row_to_permission(row))?;
        let mut out = Vec::new();
        for p in rows {
            out.push(p?);
        }
        Ok(out)
    }
}

fn row_to_permission(row: &rusqlite::Row) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: PermissionId(read_uuid(row, 0)?),
        resource_type: read_enum(row, 1)?,
        resource_id: read_uuid(row, 2)?,
        user_id: UserId(read_uuid(row, 3)?),
        level: read_enum(row, 4)?,
        created_at: read_ts(row, 5)?,
        updated_at: read_ts(row, 6)?,
    })
}
