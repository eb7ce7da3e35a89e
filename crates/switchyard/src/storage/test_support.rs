//! 测试辅助：计数 / 故障注入包装器、固定数据与后端契约用例

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::{
    Block, BlockId, BlockType, ChangeTracker, Comment, CommentId, Entity, EntityKind, ListQuery, Page,
    PageId, Permission, PermissionLevel, Record, ResourceType, Store, StoreExt, SyncWindow, User,
    UserId, Workspace,
};

/// 列举失败的注入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFailure {
    /// 普通错误（只终止当前类型的列举）
    Plain,
    /// 连接类错误
    Unavailable,
}

/// 记录每类调用次数，并可按 id 注入写失败、按类型注入列举失败
pub struct CountingStore {
    inner: Arc<dyn Store>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing_writes: Mutex<HashSet<Uuid>>,
    failing_lists: Mutex<HashMap<EntityKind, ListFailure>>,
    unavailable: Mutex<bool>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            failing_writes: Mutex::new(HashSet::new()),
            failing_lists: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(false),
        }
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn write_calls(&self) -> usize {
        ["create", "update", "delete", "reorder_blocks", "resolve_comment", "migrate_schema"]
            .iter()
            .map(|op| self.calls(op))
            .sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_writes_for(&self, id: Uuid) {
        self.failing_writes.lock().insert(id);
    }

    pub fn fail_listing(&self, kind: EntityKind, failure: ListFailure) {
        self.failing_lists.lock().insert(kind, failure);
    }

    /// 之后所有调用返回 StoreUnavailable
    pub fn go_offline(&self) {
        *self.unavailable.lock() = true;
    }

    fn hit(&self, op: &'static str) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        if *self.unavailable.lock() {
            return Err(SwitchyardError::StoreUnavailable("injected outage".into()));
        }
        Ok(())
    }

    fn check_write(&self, id: Uuid) -> Result<()> {
        if self.failing_writes.lock().contains(&id) {
            return Err(SwitchyardError::InvalidOperation(format!("injected write failure for {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for CountingStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn create(&self, record: &Record) -> Result<()> {
        self.hit("create")?;
        self.check_write(record.id())?;
        self.inner.create(record).await
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        self.hit("get")?;
        self.inner.get(kind, id).await
    }

    async fn update(&self, record: &Record) -> Result<()> {
        self.hit("update")?;
        self.check_write(record.id())?;
        self.inner.update(record).await
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        self.hit("delete")?;
        self.check_write(id)?;
        self.inner.delete(kind, id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        self.hit("list")?;
        self.inner.list(query).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.hit("get_user_by_email")?;
        self.inner.get_user_by_email(email).await
    }

    async fn check_permission(
        &self,
        user_id: UserId,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
    ) -> Result<bool> {
        self.hit("check_permission")?;
        self.inner
            .check_permission(user_id, resource_type, resource_id, level)
            .await
    }

    async fn reorder_blocks(&self, page_id: PageId, block_ids: &[BlockId]) -> Result<()> {
        self.hit("reorder_blocks")?;
        self.inner.reorder_blocks(page_id, block_ids).await
    }

    async fn resolve_comment(&self, id: CommentId) -> Result<()> {
        self.hit("resolve_comment")?;
        self.inner.resolve_comment(id).await
    }

    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        self.hit("list_modified_ids")?;
        let failure = self.failing_lists.lock().get(&kind).copied();
        match failure {
            Some(ListFailure::Plain) => Err(SwitchyardError::Serialization(format!(
                "injected listing failure for {}",
                kind
            ))),
            Some(ListFailure::Unavailable) => Err(SwitchyardError::StoreUnavailable(format!(
                "injected outage while listing {}",
                kind
            ))),
            None => self.inner.list_modified_ids(kind, window).await,
        }
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.hit("migrate_schema")?;
        self.inner.migrate_schema().await
    }

    async fn close(&self) -> Result<()> {
        self.hit("close")?;
        self.inner.close().await
    }

    fn change_tracker(&self) -> Option<&dyn ChangeTracker> {
        self.inner.change_tracker()
    }
}

/// 一个用户、一个工作区和其中一个页面
pub struct Fixture {
    pub user: User,
    pub workspace: Workspace,
    pub page: Page,
}

pub async fn seed_page<S: Store + ?Sized>(store: &S) -> Fixture {
    let user = User::new(format!("{}@example.com", Uuid::new_v4().simple()), "Owner");
    let workspace = Workspace::new("Notes", user.id);
    let page = Page::new(workspace.id, "Welcome", user.id);
    store.insert(&user).await.expect("seed user");
    store.insert(&workspace).await.expect("seed workspace");
    store.insert(&page).await.expect("seed page");
    Fixture {
        user,
        workspace,
        page,
    }
}

/// 已迁移 schema 的内存 SQLite
pub async fn memory_sqlite() -> Arc<crate::storage::SqliteStore> {
    let store = crate::storage::SqliteStore::open_in_memory().expect("open sqlite");
    store.migrate_schema().await.expect("migrate sqlite");
    Arc::new(store)
}

/// 已初始化的临时 sled
pub async fn temporary_sled() -> Arc<crate::storage::SledStore> {
    let store = crate::storage::SledStore::open_temporary().expect("open sled");
    store.migrate_schema().await.expect("migrate sled");
    Arc::new(store)
}

/// 两个后端都必须满足的契约语义
pub async fn exercise_contract(store: &dyn Store) {
    // 创建与唯一性
    let owner = User::new("owner@example.com", "Owner");
    store.insert(&owner).await.unwrap();
    let dup = store.insert(&owner).await.unwrap_err();
    assert!(matches!(dup, SwitchyardError::AlreadyExists(_)), "{dup:?}");
    let same_email = User::new("owner@example.com", "Impostor");
    let dup = store.insert(&same_email).await.unwrap_err();
    assert!(matches!(dup, SwitchyardError::AlreadyExists(_)), "{dup:?}");

    // 读取与邮箱索引
    let fetched: Option<User> = store.fetch(owner.id).await.unwrap();
    assert_eq!(fetched.as_ref(), Some(&owner));
    assert_eq!(
        store.get_user_by_email("owner@example.com").await.unwrap(),
        Some(owner.clone())
    );
    assert_eq!(store.get_user_by_email("nobody@example.com").await.unwrap(), None);

    let mut renamed = owner.clone();
    renamed.email = "owner+new@example.com".into();
    renamed.touch();
    store.save(&renamed).await.unwrap();
    assert_eq!(store.get_user_by_email("owner@example.com").await.unwrap(), None);
    assert_eq!(
        store.get_user_by_email("owner+new@example.com").await.unwrap(),
        Some(renamed.clone())
    );

    // 不存在的记录
    let ghost = Block::new(PageId::new(), BlockType::Text, 0);
    assert!(store.save(&ghost).await.unwrap_err().is_not_found());
    assert!(store
        .delete(EntityKind::Block, ghost.id.0)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store.resolve_comment(CommentId::new()).await.unwrap_err().is_not_found());

    // 层级列表
    let workspace = Workspace::new("Team", owner.id);
    store.insert(&workspace).await.unwrap();
    let root = Page::new(workspace.id, "Root", owner.id);
    let child = Page::new(workspace.id, "Child", owner.id).with_parent(root.id);
    store.insert(&root).await.unwrap();
    store.insert(&child).await.unwrap();
    assert_eq!(store.list_workspaces(owner.id).await.unwrap(), vec![workspace.clone()]);
    assert_eq!(store.list_pages(workspace.id).await.unwrap().len(), 2);
    assert_eq!(store.list_child_pages(root.id).await.unwrap(), vec![child.clone()]);

    // 块排序与重排
    let b2 = Block::text(root.id, 2, "third");
    let b0 = Block::text(root.id, 0, "first");
    let b1 = Block::text(root.id, 1, "second");
    let elsewhere = Block::text(child.id, 0, "other page");
    for b in [&b2, &b0, &b1, &elsewhere] {
        store.insert(b).await.unwrap();
    }
    let ordered: Vec<BlockId> = store
        .list_blocks(root.id)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ordered, vec![b0.id, b1.id, b2.id]);

    store
        .reorder_blocks(root.id, &[b2.id, elsewhere.id, b1.id, b0.id])
        .await
        .unwrap();
    let reordered = store.list_blocks(root.id).await.unwrap();
    let ids: Vec<BlockId> = reordered.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![b2.id, b1.id, b0.id]);
    assert_eq!(reordered[0].order, 0);
    assert_eq!(reordered[2].order, 3);
    assert!(reordered[0].updated_at >= b2.updated_at);
    let untouched: Block = store.fetch(elsewhere.id).await.unwrap().unwrap();
    assert_eq!(untouched, elsewhere);

    // 评论
    let comment = Comment::new(b0.id, owner.id, "typo here");
    store.insert(&comment).await.unwrap();
    store.resolve_comment(comment.id).await.unwrap();
    let resolved = store.list_comments(b0.id).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].is_resolved());
    assert_eq!(resolved[0].resolved_at, Some(resolved[0].updated_at));

    // 权限：直接授权、级别包含、页面继承、所有者
    let guest = User::new("guest@example.com", "Guest");
    store.insert(&guest).await.unwrap();
    let grant = Permission::new(
        ResourceType::Workspace,
        workspace.id.0,
        guest.id,
        PermissionLevel::Write,
    );
    store.insert(&grant).await.unwrap();
    assert!(store
        .check_permission(guest.id, ResourceType::Workspace, workspace.id.0, PermissionLevel::Read)
        .await
        .unwrap());
    assert!(store
        .check_permission(guest.id, ResourceType::Page, child.id.0, PermissionLevel::Write)
        .await
        .unwrap());
    assert!(!store
        .check_permission(guest.id, ResourceType::Page, child.id.0, PermissionLevel::Admin)
        .await
        .unwrap());
    assert!(store
        .check_permission(owner.id, ResourceType::Page, root.id.0, PermissionLevel::Admin)
        .await
        .unwrap());
    assert!(!store
        .check_permission(guest.id, ResourceType::Page, Uuid::new_v4(), PermissionLevel::Read)
        .await
        .unwrap());
    assert_eq!(store.list_user_permissions(guest.id).await.unwrap(), vec![grant.clone()]);
    assert_eq!(
        store
            .list_permissions(ResourceType::Workspace, workspace.id.0)
            .await
            .unwrap(),
        vec![grant]
    );

    // 修改时间窗口
    let recent = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();
    let pages = store.list_modified_ids(EntityKind::Page, &recent).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages.contains(&root.id.0) && pages.contains(&child.id.0));
    let long_ago = SyncWindow::new(
        recent.since - chrono::Duration::days(30),
        recent.since - chrono::Duration::days(29),
    )
    .unwrap();
    assert!(store
        .list_modified_ids(EntityKind::Page, &long_ago)
        .await
        .unwrap()
        .is_empty());

    // 删除
    store.remove::<Block, _>(b1.id).await.unwrap();
    assert!(store.get(EntityKind::Block, b1.id.0).await.unwrap().is_none());
}
