//! 数据访问层 (DAO) - 每张表一个专门的操作模块
//!
//! 约定：
//! - UUID 以带连字符的小写 TEXT 存储，时间为 UTC 微秒 INTEGER
//! - 写操作返回受影响行数，由上层决定 NotFound 语义
//! - 唯一约束冲突统一映射为 `AlreadyExists`

pub mod block;
pub mod change_log;
pub mod comment;
pub mod page;
pub mod permission;
pub mod user;
pub mod workspace;

pub use block::BlockDao;
pub use change_log::ChangeLogDao;
pub use comment::CommentDao;
pub use page::PageDao;
pub use permission::PermissionDao;
pub use user::UserDao;
pub use workspace::WorkspaceDao;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::{EntityKind, ListQuery, Record, SyncWindow};
use crate::utils::time;

/// 按实体类型分发到各表 DAO
pub struct RecordDao<'a> {
    conn: &'a Connection,
}

impl<'a> RecordDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &Record) -> Result<()> {
        match record {
            Record::User(e) => UserDao::new(self.conn).insert(e),
            Record::Workspace(e) => WorkspaceDao::new(self.conn).insert(e),
            Record::Page(e) => PageDao::new(self.conn).insert(e),
            Record::Block(e) => BlockDao::new(self.conn).insert(e),
            Record::Comment(e) => CommentDao::new(self.conn).insert(e),
            Record::Permission(e) => PermissionDao::new(self.conn).insert(e),
        }
    }

    /// 返回受影响行数（0 表示记录不存在）
    pub fn update(&self, record: &Record) -> Result<usize> {
        match record {
            Record::User(e) => UserDao::new(self.conn).update(e),
            Record::Workspace(e) => WorkspaceDao::new(self.conn).update(e),
            Record::Page(e) => PageDao::new(self.conn).update(e),
            Record::Block(e) => BlockDao::new(self.conn).update(e),
            Record::Comment(e) => CommentDao::new(self.conn).update(e),
            Record::Permission(e) => PermissionDao::new(self.conn).update(e),
        }
    }

    pub fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        Ok(match kind {
            EntityKind::User => UserDao::new(self.conn).get_by_id(id)?.map(Record::User),
            EntityKind::Workspace => WorkspaceDao::new(self.conn)
                .get_by_id(id)?
                .map(Record::Workspace),
            EntityKind::Page => PageDao::new(self.conn).get_by_id(id)?.map(Record::Page),
            EntityKind::Block => BlockDao::new(self.conn).get_by_id(id)?.map(Record::Block),
            EntityKind::Comment => CommentDao::new(self.conn)
                .get_by_id(id)?
                .map(Record::Comment),
            EntityKind::Permission => PermissionDao::new(self.conn)
                .get_by_id(id)?
                .map(Record::Permission),
        })
    }

    pub fn delete(&self, kind: EntityKind, id: Uuid) -> Result<usize> {
        delete_by_id(self.conn, kind.table_name(), id)
    }

    pub fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        let records = match *query {
            ListQuery::WorkspacesByOwner(owner) => WorkspaceDao::new(self.conn)
                .list_by_owner(owner)?
                .into_iter()
                .map(Record::Workspace)
                .collect(),
            ListQuery::PagesInWorkspace(ws) => PageDao::new(self.conn)
                .list_by_workspace(ws)?
                .into_iter()
                .map(Record::Page)
                .collect(),
            ListQuery::ChildPages(parent) => PageDao::new(self.conn)
                .list_children(parent)?
                .into_iter()
                .map(Record::Page)
                .collect(),
            ListQuery::BlocksInPage(page) => BlockDao::new(self.conn)
                .list_by_page(page)?
                .into_iter()
                .map(Record::Block)
                .collect(),
            ListQuery::CommentsOnBlock(block) => CommentDao::new(self.conn)
                .list_by_block(block)?
                .into_iter()
                .map(Record::Comment)
                .collect(),
            ListQuery::PermissionsOnResource {
                resource_type,
                resource_id,
            } => PermissionDao::new(self.conn)
                .list_on_resource(resource_type, resource_id)?
                .into_iter()
                .map(Record::Permission)
                .collect(),
            ListQuery::PermissionsOfUser(user) => PermissionDao::new(self.conn)
                .list_of_user(user)?
                .into_iter()
                .map(Record::Permission)
                .collect(),
        };
        Ok(records)
    }

    pub fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        list_modified_ids(self.conn, kind.table_name(), window)
    }
}

/// created_at 或 updated_at 落在 [since, until) 内的 id
pub fn list_modified_ids(conn: &Connection, table: &str, window: &SyncWindow) -> Result<Vec<Uuid>> {
    let sql = format!(
        "SELECT id FROM {} \
         WHERE (created_at >= ?1 AND created_at < ?2) OR (updated_at >= ?1 AND updated_at < ?2) \
         ORDER BY created_at, id",
        table
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![window.since_micros(), window.until_micros()], |row| {
        read_uuid(row, 0)
    })?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

pub fn delete_by_id(conn: &Connection, table: &str, id: Uuid) -> Result<usize> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table);
    Ok(conn.execute(&sql, params![id.to_string()])?)
}

/// 唯一约束冲突 → AlreadyExists，其余保持 SQLite 错误
pub(crate) fn map_constraint(err: rusqlite::Error, what: impl std::fmt::Display) -> SwitchyardError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            SwitchyardError::AlreadyExists(what.to_string())
        }
        _ => SwitchyardError::Sqlite(err),
    }
}

pub(crate) fn read_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn read_opt_uuid(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => Uuid::parse_str(&text)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn read_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    time::from_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

pub(crate) fn read_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(micros) => time::from_micros(micros)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros)),
        None => Ok(None),
    }
}

pub(crate) fn read_json_map(row: &Row, idx: usize) -> rusqlite::Result<Map<String, Value>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 受控枚举列（block_type / permission_level 等）
pub(crate) fn read_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = SwitchyardError>,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_text<T: Into<Uuid> + Copy>(id: Option<T>) -> Option<String> {
    id.map(|v| v.into().to_string())
}

/// LIMIT 参数：0 表示不限
pub(crate) fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        limit as i64
    }
}
