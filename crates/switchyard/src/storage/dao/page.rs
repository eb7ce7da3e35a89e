//! 页面 DAO - pages 表（properties 以 JSON 文本保存）

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, opt_uuid_text, read_json_map, read_opt_uuid, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{Page, PageId, UserId, WorkspaceId};
use crate::utils::time;

const COLUMNS: &str =
    "id, workspace_id, parent_page_id, title, icon, cover_image, created_by, properties, created_at, updated_at";

pub struct PageDao<'a> {
    conn: &'a Connection,
}

impl<'a> PageDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, p: &Page) -> Result<()> {
        let sql = r#"
            INSERT INTO pages (id, workspace_id, parent_page_id, title, icon, cover_image, created_by, properties, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#;
        let properties = serde_json::to_string(&p.properties)?;
        self.conn
            .execute(
                sql,
                params![
                    p.id.to_string(),
                    p.workspace_id.to_string(),
                    opt_uuid_text(p.parent_page_id),
                    p.title,
                    p.icon,
                    p.cover_image,
                    p.created_by.to_string(),
                    properties,
                    time::to_micros(&p.created_at),
                    time::to_micros(&p.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("page {}", p.id)))?;
        Ok(())
    }

    pub fn update(&self, p: &Page) -> Result<usize> {
        let sql = r#"
            UPDATE pages SET
                workspace_id = ?2,
                parent_page_id = ?3,
                title = ?4,
                icon = ?5,
                cover_image = ?6,
                created_by = ?7,
                properties = ?8,
                created_at = ?9,
                updated_at = ?10
            WHERE id = ?1
        "#;
        let properties = serde_json::to_string(&p.properties)?;
        let changed = self.conn.execute(
            sql,
            params![
                p.id.to_string(),
                p.workspace_id.to_string(),
                opt_uuid_text(p.parent_page_id),
                p.title,
                p.icon,
                p.cover_image,
                p.created_by.to_string(),
                properties,
                time::to_micros(&p.created_at),
                time::to_micros(&p.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Page>> {
        let sql = format!("SELECT {} FROM pages WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_page(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_by_workspace(&self, workspace: WorkspaceId) -> Result<Vec<Page>> {
        self.list_where("workspace_id = ?1", workspace.to_string())
    }

    pub fn list_children(&self, parent: PageId) -> Result<Vec<Page>> {
        self.list_where("parent_page_id = ?1", parent.to_string())
    }

    fn list_where(&self, filter: &str, value: String) -> Result<Vec<Page>> {
        let sql = format!(
            "SELECT {} FROM pages WHERE {} ORDER BY created_at, id",
            COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], |row| row_to_page(row))?;
        let mut out = Vec::new();
        for p in rows {
            out.push(p?);
        }
        Ok(out)
    }
}

fn row_to_page(row: &rusqlite::Row) -> rusqlite::Result<Page> {
    Ok(Page {
        id: PageId(read_uuid(row, 0)?),
        workspace_id: WorkspaceId(read_uuid(row, 1)?),
        parent_page_id: read_opt_uuid(row, 2)?.map(PageId),
        title: row.get(3)?,
        icon: row.get(4)?,
        cover_image: row.get(5)?,
        created_by: UserId(read_uuid(row, 6)?),
        properties: read_json_map(row, 7)?,
        created_at: read_ts(row, 8)?,
        updated_at: read_ts(row, 9)?,
    })
}
