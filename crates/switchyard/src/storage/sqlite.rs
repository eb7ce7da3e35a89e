//! SQLite 存储 - 关系型后端
//!
//! 本模块提供：
//! - 单连接 + 异步互斥锁（rusqlite 连接非 Sync，所有访问串行化）
//! - refinery 管理的 schema（`migrate_schema` 触发，打开时先做版本守卫）
//! - 可选变更日志：开启后每次写入在同一事务内追加 change_tracking 记录

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::change_log::{ChangeOperation, ChangeRecord, ChangeStats, ChangeTracker};
use crate::storage::dao::{BlockDao, ChangeLogDao, CommentDao, RecordDao, UserDao};
use crate::storage::migrate;
use crate::storage::permission::resolve_permission;
use crate::storage::{
    BlockId, CommentId, EntityKind, ListQuery, PageId, PermissionLevel, Record, ResourceType,
    Store, SyncWindow, User, UserId,
};
use crate::utils::time;

pub const BACKEND_NAME: &str = "sqlite";

#[derive(Debug)]
pub struct SqliteStore {
    /// None 表示已关闭
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
    change_tracking: bool,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件。schema 由 `migrate_schema` 负责，这里只做版本守卫。
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SwitchyardError::IO(format!("创建数据库目录失败: {}", e)))?;
            }
        }
        let conn = Connection::open(&path)?;
        migrate::enable_pragmas(&conn)?;
        migrate::check_db_version(&conn)?;
        info!("✅ SQLite 存储已打开: {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path),
            change_tracking: false,
        })
    }

    /// 内存数据库，主要用于测试与演练
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate::enable_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
            change_tracking: false,
        })
    }

    pub fn with_change_tracking(mut self, enabled: bool) -> Self {
        self.change_tracking = enabled;
        self
    }

    pub fn change_tracking_enabled(&self) -> bool {
        self.change_tracking
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| SwitchyardError::StoreUnavailable("sqlite store is closed".to_string()))?;
        f(conn)
    }

    /// 在事务内执行写入；开启变更日志时同事务追加记录
    async fn write_tx<T>(
        &self,
        f: impl FnOnce(&Connection, &mut Vec<PendingChange>) -> Result<T>,
    ) -> Result<T> {
        let tracking = self.change_tracking;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut changes = Vec::new();
            let out = f(&tx, &mut changes)?;
            if tracking && !changes.is_empty() {
                let dao = ChangeLogDao::new(&tx);
                let now = time::now();
                for change in &changes {
                    dao.insert(
                        change.kind,
                        change.entity_id,
                        change.operation,
                        &now,
                        change.payload.as_ref(),
                    )?;
                }
            }
            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

/// 事务内收集、提交前写入 change_tracking 的变更
struct PendingChange {
    kind: EntityKind,
    entity_id: Uuid,
    operation: ChangeOperation,
    payload: Option<Record>,
}

impl PendingChange {
    fn upsert(operation: ChangeOperation, record: Record) -> Self {
        Self {
            kind: record.kind(),
            entity_id: record.id(),
            operation,
            payload: Some(record),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn create(&self, record: &Record) -> Result<()> {
        let record = record.clone().normalized();
        self.write_tx(|conn, changes| {
            RecordDao::new(conn).insert(&record)?;
            changes.push(PendingChange::upsert(ChangeOperation::Create, record.clone()));
            Ok(())
        })
        .await
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        self.with_conn(|conn| RecordDao::new(conn).get(kind, id)).await
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let record = record.clone().normalized();
        self.write_tx(|conn, changes| {
            if RecordDao::new(conn).update(&record)? == 0 {
                return Err(SwitchyardError::NotFound(format!(
                    "{} {}",
                    record.kind(),
                    record.id()
                )));
            }
            changes.push(PendingChange::upsert(ChangeOperation::Update, record.clone()));
            Ok(())
        })
        .await
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        self.write_tx(|conn, changes| {
            if RecordDao::new(conn).delete(kind, id)? == 0 {
                return Err(SwitchyardError::NotFound(format!("{} {}", kind, id)));
            }
            changes.push(PendingChange {
                kind,
                entity_id: id,
                operation: ChangeOperation::Delete,
                payload: None,
            });
            Ok(())
        })
        .await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        self.with_conn(|conn| RecordDao::new(conn).list(query)).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| UserDao::new(conn).get_by_email(email))
            .await
    }

    async fn check_permission(
        &self,
        user_id: UserId,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
    ) -> Result<bool> {
        resolve_permission(self, user_id, resource_type, resource_id, level).await
    }

    async fn reorder_blocks(&self, page_id: PageId, block_ids: &[BlockId]) -> Result<()> {
        let now = time::now();
        self.write_tx(|conn, changes| {
            let dao = BlockDao::new(conn);
            for (index, id) in block_ids.iter().enumerate() {
                if dao.set_order(page_id, *id, index as i64, &now)? == 0 {
                    debug!("reorder_blocks 跳过不在页面 {} 上的块 {}", page_id, id);
                    continue;
                }
                if let Some(block) = dao.get_by_id(id.0)? {
                    changes.push(PendingChange::upsert(
                        ChangeOperation::Update,
                        Record::Block(block),
                    ));
                }
            }
            Ok(())
        })
        .await
    }

    async fn resolve_comment(&self, id: CommentId) -> Result<()> {
        let now = time::now();
        self.write_tx(|conn, changes| {
            let dao = CommentDao::new(conn);
            if dao.resolve(id, &now)? == 0 {
                return Err(SwitchyardError::NotFound(format!("comment {}", id)));
            }
            if let Some(comment) = dao.get_by_id(id.0)? {
                changes.push(PendingChange::upsert(
                    ChangeOperation::Update,
                    Record::Comment(comment),
                ));
            }
            Ok(())
        })
        .await
    }

    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| RecordDao::new(conn).list_modified_ids(kind, window))
            .await
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.with_conn(migrate::init_db).await?;
        info!("✅ SQLite schema 已就绪");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        match guard.take() {
            Some(conn) => {
                if let Err((conn, e)) = conn.close() {
                    warn!("⚠️ 关闭 SQLite 连接失败: {}", e);
                    *guard = Some(conn);
                    return Err(SwitchyardError::Sqlite(e));
                }
                info!("🔌 SQLite 存储已关闭");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn change_tracker(&self) -> Option<&dyn ChangeTracker> {
        if self.change_tracking {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ChangeTracker for SqliteStore {
    async fn record_change(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        operation: ChangeOperation,
        payload: Option<&Record>,
    ) -> Result<i64> {
        let changed_at = time::now();
        self.with_conn(|conn| {
            ChangeLogDao::new(conn).insert(kind, entity_id, operation, &changed_at, payload)
        })
        .await
    }

    async fn list_unprocessed_changes(&self, limit: usize) -> Result<Vec<ChangeRecord>> {
        self.with_conn(|conn| ChangeLogDao::new(conn).list_unprocessed(limit))
            .await
    }

    async fn list_changes(
        &self,
        window: &SyncWindow,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        self.with_conn(|conn| ChangeLogDao::new(conn).list_in_window(window, after_id, limit))
            .await
    }

    async fn mark_change_processed(&self, id: i64) -> Result<()> {
        let now = time::now();
        let changed = self
            .with_conn(|conn| ChangeLogDao::new(conn).mark_processed(id, &now))
            .await?;
        if changed == 0 {
            return Err(SwitchyardError::NotFound(format!("change {}", id)));
        }
        Ok(())
    }

    async fn mark_change_error(&self, id: i64, message: &str) -> Result<()> {
        let changed = self
            .with_conn(|conn| ChangeLogDao::new(conn).mark_error(id, message))
            .await?;
        if changed == 0 {
            return Err(SwitchyardError::NotFound(format!("change {}", id)));
        }
        Ok(())
    }

    async fn change_stats(&self) -> Result<ChangeStats> {
        self.with_conn(|conn| ChangeLogDao::new(conn).stats()).await
    }

    async fn purge_processed_changes(&self, before: DateTime<Utc>) -> Result<u64> {
        let purged = self
            .with_conn(|conn| ChangeLogDao::new(conn).purge_processed(&before))
            .await?;
        Ok(purged as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{self, exercise_contract};
    use crate::storage::{Block, BlockType, Comment, Entity, StoreExt};
    use tempfile::TempDir;

    async fn tracked_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_change_tracking(true);
        store.migrate_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn satisfies_store_contract() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate_schema().await.unwrap();
        exercise_contract(&store).await;
    }

    #[tokio::test]
    async fn change_log_follows_every_mutation() {
        let store = tracked_store().await;
        let fixture = test_support::seed_page(&store).await;

        let block = Block::text(fixture.page.id, 0, "first");
        store.insert(&block).await.unwrap();
        let comment = Comment::new(block.id, fixture.user.id, "looks good");
        store.insert(&comment).await.unwrap();
        store.resolve_comment(comment.id).await.unwrap();
        store.remove::<Comment, _>(comment.id).await.unwrap();

        let tracker = store.change_tracker().expect("tracking enabled");
        let window = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();
        let changes = tracker.list_changes(&window, 0, 0).await.unwrap();
        let ops: Vec<_> = changes
            .iter()
            .filter(|c| c.kind == EntityKind::Comment)
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            ops,
            vec![ChangeOperation::Create, ChangeOperation::Update, ChangeOperation::Delete]
        );

        let resolved = changes
            .iter()
            .find(|c| c.kind == EntityKind::Comment && c.operation == ChangeOperation::Update)
            .and_then(|c| c.payload.clone())
            .map(|p| Comment::from_record(p).unwrap())
            .unwrap();
        assert!(resolved.is_resolved());

        let delete = changes.last().unwrap();
        assert_eq!(delete.operation, ChangeOperation::Delete);
        assert!(delete.payload.is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_change_record() {
        let store = tracked_store().await;
        let block = Block::new(PageId::new(), BlockType::Code, 0);
        assert!(store.save(&block).await.unwrap_err().is_not_found());

        let stats = store.change_stats().await.unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn change_processing_lifecycle() {
        let store = tracked_store().await;
        let user = User::new("ops@example.com", "Ops");
        store.insert(&user).await.unwrap();
        let manual = store
            .record_change(EntityKind::User, user.id.0, ChangeOperation::Update, None)
            .await
            .unwrap();

        let pending = store.list_unprocessed_changes(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        store.mark_change_error(manual, "destination down").await.unwrap();
        store.mark_change_processed(pending[0].id).await.unwrap();

        let stats = store.change_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);

        let retry = store.list_unprocessed_changes(0).await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].retry_count, 1);
        assert_eq!(retry[0].error_message, "destination down");

        let purged = store
            .purge_processed_changes(time::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.mark_change_processed(9_999).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn tracker_hidden_when_disabled() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.change_tracker().is_none());
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate_schema().await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store.get(EntityKind::User, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::StoreUnavailable(_)));
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("notes.db");
        let user = User::new("persist@example.com", "Persist");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.migrate_schema().await.unwrap();
            store.insert(&user).await.unwrap();
            store.close().await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        store.migrate_schema().await.unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let found = store.get_user_by_email("persist@example.com").await.unwrap();
        assert_eq!(found, Some(user));
    }
}
