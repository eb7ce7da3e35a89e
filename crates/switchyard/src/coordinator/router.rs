//! 双存储路由（协调器）
//!
//! | mode      | 读     | 写               |
//! |-----------|--------|------------------|
//! | single    | 主库   | 主库             |
//! | read_only | 主库   | ReadOnlyViolation |
//! | switching | 从库   | 主库             |
//! | reversed  | 从库   | 从库             |
//!
//! 主/从由物理存储对和 `roles_swapped` 共同决定。每个操作只取一次模式快照，
//! 之后不再持锁，底层存储的错误原样返回。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::mode::{MigrationMode, MigrationState, ModeSnapshot};
use crate::error::{Result, SwitchyardError};
use crate::storage::{
    BlockId, ChangeTracker, CommentId, EntityKind, ListQuery, PageId, PermissionLevel, Record,
    ResourceType, Store, SyncWindow, User, UserId,
};
use crate::sync::{self, SyncDirection, SyncReport, SyncStrategy};

pub const BACKEND_NAME: &str = "dual";

pub struct DualStore {
    /// 物理存储对：[初始主库, 初始从库]
    stores: [Arc<dyn Store>; 2],
    state: Arc<MigrationState>,
}

impl DualStore {
    pub fn new(
        primary: Arc<dyn Store>,
        secondary: Arc<dyn Store>,
        state: Arc<MigrationState>,
    ) -> Self {
        info!(
            "🔗 双存储路由已建立: primary={}, secondary={}, mode={}",
            primary.backend(),
            secondary.backend(),
            state.get_mode()
        );
        Self {
            stores: [primary, secondary],
            state,
        }
    }

    pub fn state(&self) -> &Arc<MigrationState> {
        &self.state
    }

    pub fn mode(&self) -> MigrationMode {
        self.state.get_mode()
    }

    fn primary_of(&self, snap: &ModeSnapshot) -> &Arc<dyn Store> {
        &self.stores[usize::from(snap.roles_swapped)]
    }

    fn secondary_of(&self, snap: &ModeSnapshot) -> &Arc<dyn Store> {
        &self.stores[usize::from(!snap.roles_swapped)]
    }

    /// 当前主库
    pub fn primary(&self) -> Arc<dyn Store> {
        self.primary_of(&self.state.snapshot()).clone()
    }

    /// 当前从库
    pub fn secondary(&self) -> Arc<dyn Store> {
        self.secondary_of(&self.state.snapshot()).clone()
    }

    fn read_of(&self, snap: &ModeSnapshot) -> &Arc<dyn Store> {
        match snap.mode {
            MigrationMode::Switching | MigrationMode::Reversed => self.secondary_of(snap),
            MigrationMode::Single | MigrationMode::ReadOnly => self.primary_of(snap),
        }
    }

    fn write_of(&self, snap: &ModeSnapshot, operation: &'static str) -> Result<&Arc<dyn Store>> {
        match snap.mode {
            MigrationMode::ReadOnly => Err(SwitchyardError::ReadOnlyViolation { operation }),
            MigrationMode::Reversed => Ok(self.secondary_of(snap)),
            MigrationMode::Single | MigrationMode::Switching => Ok(self.primary_of(snap)),
        }
    }

    pub fn read_store(&self) -> Arc<dyn Store> {
        self.read_of(&self.state.snapshot()).clone()
    }

    pub fn write_store(&self) -> Result<Arc<dyn Store>> {
        self.write_of(&self.state.snapshot(), "write").cloned()
    }

    /// 同步方向对应的 (源, 目标)
    pub fn endpoints(&self, direction: SyncDirection) -> (Arc<dyn Store>, Arc<dyn Store>) {
        let snap = self.state.snapshot();
        let primary = self.primary_of(&snap).clone();
        let secondary = self.secondary_of(&snap).clone();
        match direction {
            SyncDirection::Forward => (primary, secondary),
            SyncDirection::Reverse => (secondary, primary),
        }
    }

    /// reversed 模式下写入落在从库，追平方向随之反转
    pub fn catch_up_direction(&self) -> SyncDirection {
        match self.mode() {
            MigrationMode::Reversed => SyncDirection::Reverse,
            _ => SyncDirection::Forward,
        }
    }

    /// 主库 → 从库 的时间戳追平
    pub async fn forward_sync(
        &self,
        window: &SyncWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        self.sync(SyncDirection::Forward, window, cancel).await
    }

    /// 从库 → 主库 的时间戳追平（回滚保护）
    pub async fn reverse_sync(
        &self,
        window: &SyncWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        self.sync(SyncDirection::Reverse, window, cancel).await
    }

    pub async fn sync(
        &self,
        direction: SyncDirection,
        window: &SyncWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let (source, destination) = self.endpoints(direction);
        let mut report = sync::catch_up(source.as_ref(), destination.as_ref(), window, cancel).await?;
        report.direction = Some(direction);
        Ok(report)
    }

    /// 按指定策略同步；change_tracking 策略在源端无变更日志时回退为时间戳追平
    pub async fn sync_with_strategy(
        &self,
        direction: SyncDirection,
        strategy: SyncStrategy,
        window: &SyncWindow,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let (source, destination) = self.endpoints(direction);
        let mut report = match strategy {
            SyncStrategy::Timestamp => {
                sync::catch_up(source.as_ref(), destination.as_ref(), window, cancel).await?
            }
            SyncStrategy::ChangeTracking => {
                sync::replay_change_log(
                    source.as_ref(),
                    destination.as_ref(),
                    window,
                    batch_size,
                    cancel,
                )
                .await?
            }
        };
        report.direction = Some(direction);
        Ok(report)
    }
}

#[async_trait]
impl Store for DualStore {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn create(&self, record: &Record) -> Result<()> {
        let store = self.write_of(&self.state.snapshot(), "create")?.clone();
        store.create(record).await
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        self.read_store().get(kind, id).await
    }

    /// 应用经路由的更新一律刷新 updated_at，保证时间戳追平能看到这次修改
    async fn update(&self, record: &Record) -> Result<()> {
        let store = self.write_of(&self.state.snapshot(), "update")?.clone();
        let mut record = record.clone();
        record.touch();
        store.update(&record).await
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        let store = self.write_of(&self.state.snapshot(), "delete")?.clone();
        store.delete(kind, id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        self.read_store().list(query).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.read_store().get_user_by_email(email).await
    }

    async fn check_permission(
        &self,
        user_id: UserId,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
    ) -> Result<bool> {
        self.read_store()
            .check_permission(user_id, resource_type, resource_id, level)
            .await
    }

    async fn reorder_blocks(&self, page_id: PageId, block_ids: &[BlockId]) -> Result<()> {
        let store = self.write_of(&self.state.snapshot(), "reorder_blocks")?.clone();
        store.reorder_blocks(page_id, block_ids).await
    }

    async fn resolve_comment(&self, id: CommentId) -> Result<()> {
        let store = self.write_of(&self.state.snapshot(), "resolve_comment")?.clone();
        store.resolve_comment(id).await
    }

    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        self.read_store().list_modified_ids(kind, window).await
    }

    /// 依次迁移两个存储，任一失败立即返回
    async fn migrate_schema(&self) -> Result<()> {
        for store in &self.stores {
            store.migrate_schema().await?;
        }
        Ok(())
    }

    /// 两个存储都尝试关闭，返回第一个错误
    async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for store in &self.stores {
            if let Err(e) = store.close().await {
                warn!("⚠️ 关闭 {} 存储失败: {}", store.backend(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn change_tracker(&self) -> Option<&dyn ChangeTracker> {
        self.primary_of(&self.state.snapshot()).change_tracker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{self, CountingStore};
    use crate::storage::{Page, StoreExt};

    struct Harness {
        a: Arc<CountingStore>,
        b: Arc<CountingStore>,
        router: DualStore,
    }

    async fn harness(mode: MigrationMode) -> Harness {
        let a = Arc::new(CountingStore::new(test_support::memory_sqlite().await));
        let b = Arc::new(CountingStore::new(test_support::temporary_sled().await));
        let router = DualStore::new(
            a.clone(),
            b.clone(),
            Arc::new(MigrationState::new(mode)),
        );
        Harness { a, b, router }
    }

    /// 一次读一次写分别落在哪个物理存储
    async fn probe(h: &Harness) -> (&'static str, Option<&'static str>) {
        h.a.reset_calls();
        h.b.reset_calls();
        h.router.get(EntityKind::Page, Uuid::new_v4()).await.unwrap();
        let read = if h.a.calls("get") == 1 { "a" } else { "b" };
        assert_eq!(h.a.calls("get") + h.b.calls("get"), 1);

        let user = User::new(format!("{}@probe.test", Uuid::new_v4().simple()), "probe");
        let write = match h.router.insert(&user).await {
            Ok(()) if h.a.calls("create") == 1 => Some("a"),
            Ok(()) => Some("b"),
            Err(e) => {
                assert!(e.is_read_only_violation());
                assert_eq!(h.a.write_calls() + h.b.write_calls(), 0);
                None
            }
        };
        (read, write)
    }

    #[tokio::test]
    async fn routing_table_per_mode() {
        let expected = [
            (MigrationMode::Single, "a", Some("a")),
            (MigrationMode::ReadOnly, "a", None),
            (MigrationMode::Switching, "b", Some("a")),
            (MigrationMode::Reversed, "b", Some("b")),
        ];
        for (mode, read, write) in expected {
            let h = harness(mode).await;
            assert_eq!(probe(&h).await, (read, write), "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn swapped_roles_mirror_the_table() {
        let h = harness(MigrationMode::Single).await;
        h.router.state().swap_roles();
        assert_eq!(probe(&h).await, ("b", Some("b")));

        h.router.state().set_mode(MigrationMode::Switching).unwrap();
        assert_eq!(probe(&h).await, ("a", Some("b")));
    }

    #[tokio::test]
    async fn read_only_write_store_is_refused() {
        let h = harness(MigrationMode::ReadOnly).await;
        assert!(matches!(h.router.write_store(), Err(e) if e.is_read_only_violation()));
        let err = h
            .router
            .reorder_blocks(PageId::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwitchyardError::ReadOnlyViolation { operation: "reorder_blocks" }
        ));
    }

    #[tokio::test]
    async fn migrate_schema_fails_fast() {
        let h = harness(MigrationMode::Single).await;
        h.a.go_offline();
        let err = h.router.migrate_schema().await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(h.b.calls("migrate_schema"), 0);
    }

    #[tokio::test]
    async fn close_attempts_both_and_reports_first_error() {
        let h = harness(MigrationMode::Single).await;
        h.a.go_offline();
        assert!(h.router.close().await.is_err());
        assert_eq!(h.b.calls("close"), 1);
    }

    #[tokio::test]
    async fn store_errors_pass_through_unmasked() {
        let h = harness(MigrationMode::Switching).await;
        h.b.go_offline();
        let err = h.router.get(EntityKind::User, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn catch_up_direction_follows_mode() {
        let h = harness(MigrationMode::Single).await;
        assert_eq!(h.router.catch_up_direction(), SyncDirection::Forward);
        h.router.state().set_mode(MigrationMode::Reversed).unwrap();
        assert_eq!(h.router.catch_up_direction(), SyncDirection::Reverse);

        let (source, _) = h.router.endpoints(SyncDirection::Reverse);
        assert_eq!(source.backend(), "sled");
    }

    #[tokio::test]
    async fn forward_then_switch_serves_synced_data() {
        let h = harness(MigrationMode::Single).await;
        let fixture = test_support::seed_page(&h.router).await;
        let cancel = CancellationToken::new();
        let window = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();

        let report = h.router.forward_sync(&window, &cancel).await.unwrap();
        assert_eq!(report.direction, Some(SyncDirection::Forward));
        assert_eq!(report.processed(), 3);

        h.router.state().set_mode(MigrationMode::Switching).unwrap();
        h.b.reset_calls();
        let page: Page = h.router.fetch(fixture.page.id).await.unwrap().unwrap();
        assert_eq!(page, fixture.page);
        assert_eq!(h.b.calls("get"), 1);
    }

    #[tokio::test]
    async fn routed_update_is_seen_by_the_next_catch_up() {
        let h = harness(MigrationMode::Single).await;
        let cancel = CancellationToken::new();
        let two_days_ago = crate::utils::time::now() - chrono::Duration::days(2);
        let mut page = Page::new(crate::storage::WorkspaceId::new(), "A", UserId::new());
        page.created_at = two_days_ago;
        page.updated_at = two_days_ago;
        h.router.insert(&page).await.unwrap();
        let everything = SyncWindow::new(two_days_ago, crate::utils::time::now()).unwrap();
        h.router.forward_sync(&everything, &cancel).await.unwrap();

        // 不手动 touch
        page.title = "B".into();
        h.router.save(&page).await.unwrap();
        let stored: Page = h.a.fetch(page.id).await.unwrap().unwrap();
        assert!(stored.updated_at > two_days_ago);

        let recent = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();
        let report = h.router.forward_sync(&recent, &cancel).await.unwrap();
        assert_eq!(report.kind(EntityKind::Page).unwrap().updated, 1);
        let copied: Page = h.b.fetch(page.id).await.unwrap().unwrap();
        assert_eq!(copied.title, "B");
        assert_eq!(copied, stored);
    }
}
