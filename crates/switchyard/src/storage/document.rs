//! 文档存储 - 基于 sled 的文档型后端
//!
//! 本模块提供：
//! - 每种实体一棵 tree（名称与 SQLite 表名一致），key = UUID 16 字节，value = 实体 JSON
//! - users_by_email 二级索引，与用户文档在同一个 sled 事务中维护
//! - meta tree 中的文档结构版本守卫
//!
//! 列表与时间窗口查询通过扫描完成；排序规则与 SQLite 后端一致。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::permission::resolve_permission;
use crate::storage::{
    Block, BlockId, Comment, CommentId, EntityKind, ListQuery, Page, PageId, Permission,
    PermissionLevel, Record, ResourceType, Store, SyncWindow, User, UserId, Workspace,
};
use crate::utils::time;
use crate::version::DOCUMENT_SCHEMA_VERSION;

pub const BACKEND_NAME: &str = "sled";

const EMAIL_INDEX_TREE: &str = "users_by_email";
const META_TREE: &str = "meta";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub struct SledStore {
    db: Db,
    users: Tree,
    workspaces: Tree,
    pages: Tree,
    blocks: Tree,
    comments: Tree,
    permissions: Tree,
    email_index: Tree,
    meta: Tree,
    path: Option<PathBuf>,
    closed: AtomicBool,
}

impl SledStore {
    /// 打开 sled 数据库。上一个进程可能刚释放文件锁，遇到锁冲突时退避重试。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| SwitchyardError::IO(format!("创建文档存储目录失败: {}", e)))?;

        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        warn!("⚠️ sled 文件锁被占用，{}ms 后重试 ({}/{})", delay_ms, attempt + 1, MAX_OPEN_RETRIES);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            SwitchyardError::StoreUnavailable(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        info!("✅ sled 文档存储已打开: {}", path.display());
        Self::from_db(db, Some(path))
    }

    /// 临时库（进程退出即删除），用于测试与演练
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, None)
    }

    fn from_db(db: Db, path: Option<PathBuf>) -> Result<Self> {
        let store = Self {
            users: db.open_tree(EntityKind::User.table_name())?,
            workspaces: db.open_tree(EntityKind::Workspace.table_name())?,
            pages: db.open_tree(EntityKind::Page.table_name())?,
            blocks: db.open_tree(EntityKind::Block.table_name())?,
            comments: db.open_tree(EntityKind::Comment.table_name())?,
            permissions: db.open_tree(EntityKind::Permission.table_name())?,
            email_index: db.open_tree(EMAIL_INDEX_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
            path,
            closed: AtomicBool::new(false),
        };
        store.check_schema_version()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn tree(&self, kind: EntityKind) -> &Tree {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Workspace => &self.workspaces,
            EntityKind::Page => &self.pages,
            EntityKind::Block => &self.blocks,
            EntityKind::Comment => &self.comments,
            EntityKind::Permission => &self.permissions,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwitchyardError::StoreUnavailable(
                "sled store is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn stored_schema_version(&self) -> Result<Option<i64>> {
        match self.meta.get(SCHEMA_VERSION_KEY)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_ref().try_into().map_err(|_| {
                    SwitchyardError::Migration("corrupt document schema version".to_string())
                })?;
                Ok(Some(i64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn check_schema_version(&self) -> Result<()> {
        if let Some(v) = self.stored_schema_version()? {
            if v > DOCUMENT_SCHEMA_VERSION {
                return Err(SwitchyardError::Migration(format!(
                    "document schema version {} is newer than supported version {}",
                    v, DOCUMENT_SCHEMA_VERSION
                )));
            }
        }
        Ok(())
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for item in self.tree(kind).iter() {
            let (_, value) = item?;
            out.push(decode(kind, &value)?);
        }
        Ok(out)
    }

    fn create_user(&self, user: &User, value: &[u8]) -> Result<()> {
        let key: &[u8] = user.id.0.as_bytes();
        let email = user.email.as_bytes();
        let result: TransactionResult<(), SwitchyardError> = (&self.users, &self.email_index)
            .transaction(|(users, index)| {
                if users.get(key)?.is_some() {
                    return abort(SwitchyardError::AlreadyExists(format!("user {}", user.id)));
                }
                if index.get(email)?.is_some() {
                    return abort(SwitchyardError::AlreadyExists(format!("email {}", user.email)));
                }
                users.insert(key, value)?;
                index.insert(email, key)?;
                Ok(())
            });
        unwrap_tx(result)
    }

    fn update_user(&self, user: &User, value: &[u8]) -> Result<()> {
        let key: &[u8] = user.id.0.as_bytes();
        let new_email = user.email.as_bytes();
        let result: TransactionResult<(), SwitchyardError> = (&self.users, &self.email_index)
            .transaction(|(users, index)| {
                let Some(old) = users.get(key)? else {
                    return abort(SwitchyardError::NotFound(format!("user {}", user.id)));
                };
                let old: User = match serde_json::from_slice(&old) {
                    Ok(u) => u,
                    Err(e) => return abort(SwitchyardError::from(e)),
                };
                if old.email != user.email {
                    if let Some(owner) = index.get(new_email)? {
                        if owner.as_ref() != key {
                            return abort(SwitchyardError::AlreadyExists(format!(
                                "email {}",
                                user.email
                            )));
                        }
                    }
                    index.remove(old.email.as_bytes())?;
                    index.insert(new_email, key)?;
                }
                users.insert(key, value)?;
                Ok(())
            });
        unwrap_tx(result)
    }

    fn delete_user(&self, id: Uuid) -> Result<()> {
        let key: &[u8] = id.as_bytes();
        let result: TransactionResult<(), SwitchyardError> = (&self.users, &self.email_index)
            .transaction(|(users, index)| {
                let Some(old) = users.remove(key)? else {
                    return abort(SwitchyardError::NotFound(format!("user {}", id)));
                };
                if let Ok(old) = serde_json::from_slice::<User>(&old) {
                    index.remove(old.email.as_bytes())?;
                }
                Ok(())
            });
        unwrap_tx(result)
    }
}

fn abort<T>(err: SwitchyardError) -> std::result::Result<T, ConflictableTransactionError<SwitchyardError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn unwrap_tx<T>(result: TransactionResult<T, SwitchyardError>) -> Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    })
}

fn encode(record: &Record) -> Result<Vec<u8>> {
    let bytes = match record {
        Record::User(e) => serde_json::to_vec(e)?,
        Record::Workspace(e) => serde_json::to_vec(e)?,
        Record::Page(e) => serde_json::to_vec(e)?,
        Record::Block(e) => serde_json::to_vec(e)?,
        Record::Comment(e) => serde_json::to_vec(e)?,
        Record::Permission(e) => serde_json::to_vec(e)?,
    };
    Ok(bytes)
}

fn decode(kind: EntityKind, bytes: &[u8]) -> Result<Record> {
    Ok(match kind {
        EntityKind::User => Record::User(serde_json::from_slice::<User>(bytes)?),
        EntityKind::Workspace => Record::Workspace(serde_json::from_slice::<Workspace>(bytes)?),
        EntityKind::Page => Record::Page(serde_json::from_slice::<Page>(bytes)?),
        EntityKind::Block => Record::Block(serde_json::from_slice::<Block>(bytes)?),
        EntityKind::Comment => Record::Comment(serde_json::from_slice::<Comment>(bytes)?),
        EntityKind::Permission => Record::Permission(serde_json::from_slice::<Permission>(bytes)?),
    })
}

#[async_trait]
impl Store for SledStore {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn create(&self, record: &Record) -> Result<()> {
        self.ensure_open()?;
        let record = record.clone().normalized();
        let value = encode(&record)?;
        if let Record::User(user) = &record {
            return self.create_user(user, &value);
        }
        let key = record.id();
        let swapped = self
            .tree(record.kind())
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        if swapped.is_err() {
            return Err(SwitchyardError::AlreadyExists(format!(
                "{} {}",
                record.kind(),
                key
            )));
        }
        Ok(())
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>> {
        self.ensure_open()?;
        match self.tree(kind).get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(kind, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, record: &Record) -> Result<()> {
        self.ensure_open()?;
        let record = record.clone().normalized();
        let value = encode(&record)?;
        if let Record::User(user) = &record {
            return self.update_user(user, &value);
        }
        let kind = record.kind();
        let id = record.id();
        let result: TransactionResult<(), SwitchyardError> =
            self.tree(kind).transaction(|tree| {
                if tree.get(id.as_bytes())?.is_none() {
                    return abort(SwitchyardError::NotFound(format!("{} {}", kind, id)));
                }
                tree.insert(&id.as_bytes()[..], value.as_slice())?;
                Ok(())
            });
        unwrap_tx(result)
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        self.ensure_open()?;
        if kind == EntityKind::User {
            return self.delete_user(id);
        }
        match self.tree(kind).remove(id.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(SwitchyardError::NotFound(format!("{} {}", kind, id))),
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let mut records: Vec<Record> = self
            .scan(query.kind())?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        query.sort(&mut records);
        Ok(records)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.ensure_open()?;
        let Some(key) = self.email_index.get(email.as_bytes())? else {
            return Ok(None);
        };
        match self.users.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
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
        self.ensure_open()?;
        let now = time::now();
        let result: TransactionResult<(), SwitchyardError> = self.blocks.transaction(|tree| {
            for (index, id) in block_ids.iter().enumerate() {
                let Some(raw) = tree.get(id.0.as_bytes())? else {
                    continue;
                };
                let mut block: Block = match serde_json::from_slice(&raw) {
                    Ok(b) => b,
                    Err(e) => return abort(SwitchyardError::from(e)),
                };
                if block.page_id != page_id {
                    continue;
                }
                block.order = index as i64;
                block.updated_at = now;
                let value = match serde_json::to_vec(&block) {
                    Ok(v) => v,
                    Err(e) => return abort(SwitchyardError::from(e)),
                };
                tree.insert(&id.0.as_bytes()[..], value)?;
            }
            Ok(())
        });
        unwrap_tx(result)?;
        debug!("页面 {} 的 {} 个块已重排", page_id, block_ids.len());
        Ok(())
    }

    async fn resolve_comment(&self, id: CommentId) -> Result<()> {
        self.ensure_open()?;
        let now = time::now();
        let result: TransactionResult<(), SwitchyardError> = self.comments.transaction(|tree| {
            let Some(raw) = tree.get(id.0.as_bytes())? else {
                return abort(SwitchyardError::NotFound(format!("comment {}", id)));
            };
            let mut comment: Comment = match serde_json::from_slice(&raw) {
                Ok(c) => c,
                Err(e) => return abort(SwitchyardError::from(e)),
            };
            comment.resolved_at = Some(now);
            comment.updated_at = now;
            let value = match serde_json::to_vec(&comment) {
                Ok(v) => v,
                Err(e) => return abort(SwitchyardError::from(e)),
            };
            tree.insert(&id.0.as_bytes()[..], value)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn list_modified_ids(&self, kind: EntityKind, window: &SyncWindow) -> Result<Vec<Uuid>> {
        self.ensure_open()?;
        let mut modified: Vec<Record> = self
            .scan(kind)?
            .into_iter()
            .filter(|r| r.modified_within(window))
            .collect();
        modified.sort_by_key(|r| (r.created_at(), r.id()));
        Ok(modified.into_iter().map(|r| r.id()).collect())
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.ensure_open()?;
        self.check_schema_version()?;
        let previous = self.stored_schema_version()?;
        if previous != Some(DOCUMENT_SCHEMA_VERSION) {
            self.meta
                .insert(SCHEMA_VERSION_KEY, DOCUMENT_SCHEMA_VERSION.to_be_bytes().to_vec())?;
            self.db.flush_async().await?;
            info!(
                "📦 sled 文档结构版本: {:?} -> {}",
                previous, DOCUMENT_SCHEMA_VERSION
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush_async().await?;
        info!("🔌 sled 文档存储已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::exercise_contract;
    use crate::storage::StoreExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn satisfies_store_contract() {
        let store = SledStore::open_temporary().unwrap();
        store.migrate_schema().await.unwrap();
        exercise_contract(&store).await;
    }

    #[tokio::test]
    async fn deleting_user_frees_email() {
        let store = SledStore::open_temporary().unwrap();
        let user = User::new("free@example.com", "Free");
        store.insert(&user).await.unwrap();
        store.remove::<User, _>(user.id).await.unwrap();
        assert_eq!(store.get_user_by_email("free@example.com").await.unwrap(), None);

        let again = User::new("free@example.com", "Again");
        store.insert(&again).await.unwrap();
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = SledStore::open_temporary().unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        let err = store.get(EntityKind::Page, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn refuses_newer_document_schema() {
        let dir = TempDir::new().unwrap();
        {
            let store = SledStore::open(dir.path()).await.unwrap();
            store.migrate_schema().await.unwrap();
            store
                .meta
                .insert(SCHEMA_VERSION_KEY, (DOCUMENT_SCHEMA_VERSION + 1).to_be_bytes().to_vec())
                .unwrap();
            store.close().await.unwrap();
        }
        let err = match SledStore::open(dir.path()).await {
            Ok(_) => panic!("newer schema must be refused"),
            Err(e) => e,
        };
        assert!(matches!(err, SwitchyardError::Migration(_)));
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let user = User::new("disk@example.com", "Disk");
        {
            let store = SledStore::open(dir.path()).await.unwrap();
            store.migrate_schema().await.unwrap();
            store.insert(&user).await.unwrap();
            store.close().await.unwrap();
        }
        let store = SledStore::open(dir.path()).await.unwrap();
        assert_eq!(store.path(), Some(dir.path()));
        let found: Option<User> = store.fetch(user.id).await.unwrap();
        assert_eq!(found, Some(user));
    }
}
