//! 数据库迁移与初始化 - 由 refinery 自动管理
//!
//! - Migration 版本 = migrations 文件顺序（V{n}__{name}.sql），编译期嵌入。
//! - 统一入口 `init_db`：pragmas → migrate → 版本校验。
//! - 只向前迁移；数据库版本高于当前代码支持的版本时拒绝打开。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, SwitchyardError};
use crate::version::SQLITE_SCHEMA_VERSION;

/// refinery 使用的 migration 历史表名（与 refinery 默认一致，用于版本校验）
const REFINERY_TABLE: &str = "refinery_schema_history";

/// WAL、NORMAL 同步、内存临时表。不开外键：追平同步允许子实体先于父实体到达。
const STORE_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA temp_store=MEMORY;
PRAGMA busy_timeout=5000;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(STORE_PRAGMAS.trim())
        .map_err(|e| SwitchyardError::Migration(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

/// 执行内置 migrations（编译期嵌入，按版本顺序执行，已执行的跳过）
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| SwitchyardError::Migration(format!("执行 migration 失败: {}", e)))?;
    for migration in report.applied_migrations() {
        info!("📦 已应用 migration: {}", migration);
    }
    Ok(())
}

/// 读取 refinery 表中当前数据库的 migration 版本；无表或空表返回 None
pub fn get_db_migration_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            [REFINERY_TABLE],
            |row| row.get(0),
        )
        .map_err(|e| SwitchyardError::Migration(format!("查询 {} 失败: {}", REFINERY_TABLE, e)))?;

    if !exists {
        return Ok(None);
    }

    let version: Option<i64> = conn
        .query_row(
            &format!("SELECT MAX(version) FROM {}", REFINERY_TABLE),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(|e| SwitchyardError::Migration(format!("读取 migration 版本失败: {}", e)))?;

    Ok(version.filter(|&v| v > 0))
}

/// 版本守卫：DB 版本高于代码支持的最高版本时拒绝（防止回滚部署后 schema 不兼容）
pub fn check_db_version(conn: &Connection) -> Result<()> {
    let Some(v) = get_db_migration_version(conn)? else {
        return Ok(());
    };
    if v > SQLITE_SCHEMA_VERSION {
        return Err(SwitchyardError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            v, SQLITE_SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// 统一初始化入口：先开 pragmas，再做版本校验，最后执行 migrations
pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    check_db_version(conn)?;
    run_migrations(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        init_db(&mut conn).unwrap();
        assert_eq!(
            get_db_migration_version(&conn).unwrap(),
            Some(SQLITE_SCHEMA_VERSION)
        );

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('users','workspaces','pages','blocks','comments','permissions','change_tracking')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[test]
    fn refuses_newer_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name, applied_on, checksum) VALUES (?1, 'future', '', '0')",
                REFINERY_TABLE
            ),
            [SQLITE_SCHEMA_VERSION + 1],
        )
        .unwrap();

        let err = init_db(&mut conn).unwrap_err();
        assert!(matches!(err, SwitchyardError::Migration(_)));
    }

    #[test]
    fn fresh_database_has_no_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_db_migration_version(&conn).unwrap(), None);
    }
}
