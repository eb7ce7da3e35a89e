//! 存储层 - 统一存储契约与两种后端
//!
//! 本模块提供：
//! - `Store` 契约：CRUD + 按修改时间窗口列举 id，协调器只依赖这一接口
//! - `SqliteStore`：关系型后端（rusqlite + refinery 迁移 + 可选变更日志）
//! - `SledStore`：文档型后端（每种实体一棵 tree，JSON 文档）
//! - `ReadOnlyStore`：只读守卫装饰器

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

pub mod change_log;
pub mod dao;
pub mod document;
pub mod entities;
pub mod migrate;
pub mod permission;
pub mod readonly;
pub mod record;
pub mod sqlite;
pub mod window;

pub use change_log::{ChangeOperation, ChangeRecord, ChangeStats, ChangeTracker};
pub use document::SledStore;
pub use entities::{
    Block, BlockId, BlockType, Comment, CommentId, Entity, Page, PageId, Permission,
    PermissionId, PermissionLevel, ResourceType, User, UserId, Workspace, WorkspaceId,
};
pub use readonly::ReadOnlyStore;
pub use record::{EntityKind, Record};
pub use sqlite::SqliteStore;
pub use window::SyncWindow;

/// 各后端支持的列表查询
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListQuery {
    WorkspacesByOwner(UserId),
    PagesInWorkspace(WorkspaceId),
    ChildPages(PageId),
    /// 按 order 升序
    BlocksInPage(PageId),
    CommentsOnBlock(BlockId),
    PermissionsOnResource {
        resource_type: ResourceType,
        resource_id: Uuid,
    },
    PermissionsOfUser(UserId),
}

impl ListQuery {
    pub fn kind(&self) -> EntityKind {
        match self {
            ListQuery::WorkspacesByOwner(_) => EntityKind::Workspace,
            ListQuery::PagesInWorkspace(_) | ListQuery::ChildPages(_) => EntityKind::Page,
            ListQuery::BlocksInPage(_) => EntityKind::Block,
            ListQuery::CommentsOnBlock(_) => EntityKind::Comment,
            ListQuery::PermissionsOnResource { .. } | ListQuery::PermissionsOfUser(_) => {
                EntityKind::Permission
            }
        }
    }

    /// 文档后端扫描时的过滤条件
    pub fn matches(&self, record: &Record) -> bool {
        match (self, record) {
            (ListQuery::WorkspacesByOwner(owner), Record::Workspace(w)) => w.owner_id == *owner,
            (ListQuery::PagesInWorkspace(ws), Record::Page(p)) => p.workspace_id == *ws,
            (ListQuery::ChildPages(parent), Record::Page(p)) => p.parent_page_id == Some(*parent),
            (ListQuery::BlocksInPage(page), Record::Block(b)) => b.page_id == *page,
            (ListQuery::CommentsOnBlock(block), Record::Comment(c)) => c.block_id == *block,
            (
                ListQuery::PermissionsOnResource {
                    resource_type,
                    resource_id,
                },
                Record::Permission(p),
            ) => p.resource_type == *resource_type && p.resource_id == *resource_id,
            (ListQuery::PermissionsOfUser(user), Record::Permission(p)) => p.user_id == *user,
            _ => false,
        }
    }

    /// 两个后端共同的排序：块按 order，其余按 created_at；id 兜底保证稳定
    pub fn sort(&self, records: &mut [Record]) {
        match self {
            ListQuery::BlocksInPage(_) => records.sort_by_key(|r| {
                let order = match r {
                    Record::Block(b) => b.order,
                    _ => 0,
                };
                (order, r.created_at(), r.id())
            }),
            _ => records.sort_by_key(|r| (r.created_at(), r.id())),
        }
    }
}

/// 统一存储契约
///
/// 协调器、只读守卫和两个具体后端都实现这一 trait，调用方无法区分。
/// 已关闭的存储上的任何操作返回 `StoreUnavailable`。
#[async_trait]
pub trait Store: Send + Sync {
    /// 后端名称，用于日志与状态报告
    fn backend(&self) -> &'static str;

    /// id 已存在（或用户邮箱已被占用）时返回 `AlreadyExists`
    async fn create(&self, record: &Record) -> Result<()>;

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>>;

    /// 记录不存在时返回 `NotFound`
    async fn update(&self, record: &Record) -> Result<()>;

    /// 记录不存在时返回 `NotFound`
    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// 用户对资源是否具备至少 `level` 的权限（含所有者与工作区继承）
    async fn check_permission(
        &self,
        user_id: UserId,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
    ) -> Result<bool>;

    /// 按给定顺序设置 `order = 下标`；不在该页的块被忽略
    async fn reorder_blocks(&self, page_id: PageId, block_ids: &[BlockId]) -> Result<()>;

    async fn resolve_comment(&self, id: CommentId) -> Result<()>;

    /// created_at 或 updated_at 落在窗口内的 id
    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>>;

    async fn migrate_schema(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// 变更日志能力；不支持的后端返回 None
    fn change_tracker(&self) -> Option<&dyn ChangeTracker> {
        None
    }
}

/// 带实体类型的便捷方法，对任意 `Store` 自动可用
#[async_trait]
pub trait StoreExt: Store {
    async fn insert<E: Entity>(&self, entity: &E) -> Result<()> {
        self.create(&entity.clone().into_record()).await
    }

    async fn fetch<E: Entity, I: Into<Uuid> + Send>(&self, id: I) -> Result<Option<E>> {
        match self.get(E::KIND, id.into()).await? {
            Some(record) => E::from_record(record).map(Some),
            None => Ok(None),
        }
    }

    async fn save<E: Entity>(&self, entity: &E) -> Result<()> {
        self.update(&entity.clone().into_record()).await
    }

    async fn remove<E: Entity, I: Into<Uuid> + Send>(&self, id: I) -> Result<()> {
        self.delete(E::KIND, id.into()).await
    }

    async fn list_as<E: Entity>(&self, query: &ListQuery) -> Result<Vec<E>> {
        self.list(query)
            .await?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    async fn list_workspaces(&self, owner: UserId) -> Result<Vec<Workspace>> {
        self.list_as(&ListQuery::WorkspacesByOwner(owner)).await
    }

    async fn list_pages(&self, workspace: WorkspaceId) -> Result<Vec<Page>> {
        self.list_as(&ListQuery::PagesInWorkspace(workspace)).await
    }

    async fn list_child_pages(&self, parent: PageId) -> Result<Vec<Page>> {
        self.list_as(&ListQuery::ChildPages(parent)).await
    }

    async fn list_blocks(&self, page: PageId) -> Result<Vec<Block>> {
        self.list_as(&ListQuery::BlocksInPage(page)).await
    }

    async fn list_comments(&self, block: BlockId) -> Result<Vec<Comment>> {
        self.list_as(&ListQuery::CommentsOnBlock(block)).await
    }

    async fn list_permissions(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Result<Vec<Permission>> {
        self.list_as(&ListQuery::PermissionsOnResource {
            resource_type,
            resource_id,
        })
        .await
    }

    async fn list_user_permissions(&self, user: UserId) -> Result<Vec<Permission>> {
        self.list_as(&ListQuery::PermissionsOfUser(user)).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

#[cfg(test)]
pub(crate) mod test_support;
