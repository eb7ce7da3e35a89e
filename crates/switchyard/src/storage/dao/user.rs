//! 用户 DAO - users 表（email 唯一）

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{map_constraint, read_ts, read_uuid};
use crate::error::Result;
use crate::storage::entities::{User, UserId};
use crate::utils::time;

const COLUMNS: &str = "id, email, name, avatar_url, created_at, updated_at";

pub struct UserDao<'a> {
    conn: &'a Connection,
}

impl<'a> UserDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, u: &User) -> Result<()> {
        let sql = r#"
            INSERT INTO users (id, email, name, avatar_url, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#;
        self.conn
            .execute(
                sql,
                params![
                    u.id.to_string(),
                    u.email,
                    u.name,
                    u.avatar_url,
                    time::to_micros(&u.created_at),
                    time::to_micros(&u.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("user {} ({})", u.id, u.email)))?;
        Ok(())
    }

    pub fn update(&self, u: &User) -> Result<usize> {
        let sql = r#"
            UPDATE users SET
                email = ?2,
                name = ?3,
                avatar_url = ?4,
                created_at = ?5,
                updated_at = ?6
            WHERE id = ?1
        "#;
        let changed = self
            .conn
            .execute(
                sql,
                params![
                    u.id.to_string(),
                    u.email,
                    u.name,
                    u.avatar_url,
                    time::to_micros(&u.created_at),
                    time::to_micros(&u.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, format_args!("email {}", u.email)))?;
        Ok(changed)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| row_to_user(row))?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![email], |row| row_to_user(row))?;
        Ok(rows.next().transpose()?)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(read_uuid(row, 0)?),
        email: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: read_ts(row, 4)?,
        updated_at: read_ts(row, 5)?,
    })
}
