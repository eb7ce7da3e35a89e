//! 只读守卫
//!
//! 包装任意 `Store`，每次写操作前先求值只读谓词；谓词为真时直接返回
//! `ReadOnlyViolation`，请求不会到达内层存储。读操作与 `close` 直接透传。
//! 守卫本身不持锁，谓词是唯一的同步点。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::{
    BlockId, ChangeTracker, CommentId, EntityKind, ListQuery, PageId, PermissionLevel, Record,
    ResourceType, Store, SyncWindow, User, UserId,
};

/// 只读谓词
pub type ReadOnlyPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct ReadOnlyStore<S: Store + ?Sized> {
    inner: Arc<S>,
    is_read_only: ReadOnlyPredicate,
}

impl<S: Store + ?Sized> ReadOnlyStore<S> {
    pub fn new(inner: Arc<S>, is_read_only: ReadOnlyPredicate) -> Self {
        Self {
            inner,
            is_read_only,
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn into_inner(self) -> Arc<S> {
        self.inner
    }

    pub fn is_read_only(&self) -> bool {
        (self.is_read_only)()
    }

    fn check_writable(&self, operation: &'static str) -> Result<()> {
        if (self.is_read_only)() {
            debug!("🔒 只读期间拒绝写操作: {}", operation);
            return Err(SwitchyardError::ReadOnlyViolation { operation });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for ReadOnlyStore<S> {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn create(&self, record: &Record) -> Result<()> {
        self.check_writable("create")?;
        self.inner.create(record).await
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        self.inner.get(kind, id).await
    }

    async fn update(&self, record: &Record) -> Result<()> {
        self.check_writable("update")?;
        self.inner.update(record).await
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        self.check_writable("delete")?;
        self.inner.delete(kind, id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        self.inner.list(query).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.get_user_by_email(email).await
    }

    async fn check_permission(
        &self,
        user_id: UserId,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
    ) -> Result<bool> {
        self.inner
            .check_permission(user_id, resource_type, resource_id, level)
            .await
    }

    async fn reorder_blocks(&self, page_id: PageId, block_ids: &[BlockId]) -> Result<()> {
        self.check_writable("reorder_blocks")?;
        self.inner.reorder_blocks(page_id, block_ids).await
    }

    async fn resolve_comment(&self, id: CommentId) -> Result<()> {
        self.check_writable("resolve_comment")?;
        self.inner.resolve_comment(id).await
    }

    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        self.inner.list_modified_ids(kind, window).await
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.check_writable("migrate_schema")?;
        self.inner.migrate_schema().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn change_tracker(&self) -> Option<&dyn ChangeTracker> {
        self.inner.change_tracker()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::test_support::{self, CountingStore};
    use crate::storage::{Block, BlockType, Comment, Entity, StoreExt};

    async fn guarded(
        flag: Arc<AtomicBool>,
    ) -> (Arc<CountingStore>, ReadOnlyStore<CountingStore>) {
        let inner = Arc::new(CountingStore::new(test_support::memory_sqlite().await));
        let predicate: ReadOnlyPredicate = Arc::new(move || flag.load(Ordering::SeqCst));
        (inner.clone(), ReadOnlyStore::new(inner, predicate))
    }

    #[tokio::test]
    async fn writes_never_reach_inner_store_while_read_only() {
        let flag = Arc::new(AtomicBool::new(true));
        let (inner, guard) = guarded(flag.clone()).await;
        let block = Block::new(PageId::new(), BlockType::Text, 0);
        let record = block.clone().into_record();

        let results = vec![
            guard.create(&record).await,
            guard.update(&record).await,
            guard.delete(EntityKind::Block, block.id.0).await,
            guard.reorder_blocks(block.page_id, &[block.id]).await,
            guard.resolve_comment(CommentId::new()).await,
            guard.migrate_schema().await,
        ];
        for result in results {
            assert!(result.unwrap_err().is_read_only_violation());
        }
        assert_eq!(inner.total_calls(), 0);

        // 读操作照常透传
        assert!(guard.get(EntityKind::Block, block.id.0).await.unwrap().is_none());
        assert_eq!(inner.total_calls(), 1);
    }

    #[tokio::test]
    async fn predicate_is_evaluated_per_call() {
        let flag = Arc::new(AtomicBool::new(false));
        let (_inner, guard) = guarded(flag.clone()).await;
        guard.migrate_schema().await.unwrap();

        let block = Block::text(PageId::new(), 0, "hello");
        guard.insert(&block).await.unwrap();

        flag.store(true, Ordering::SeqCst);
        let comment = Comment::new(block.id, crate::storage::UserId::new(), "nit");
        assert!(guard.insert(&comment).await.unwrap_err().is_read_only_violation());
        assert!(guard.is_read_only());

        flag.store(false, Ordering::SeqCst);
        guard.insert(&comment).await.unwrap();
        let fetched: Option<Block> = guard.fetch(block.id).await.unwrap();
        assert_eq!(fetched, Some(block));
    }

    #[tokio::test]
    async fn close_passes_through_when_read_only() {
        let flag = Arc::new(AtomicBool::new(true));
        let (inner, guard) = guarded(flag).await;
        guard.close().await.unwrap();
        assert_eq!(inner.calls("close"), 1);
    }
}
