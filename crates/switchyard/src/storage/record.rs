//! 实体类型枚举与统一记录
//!
//! `EntityKind` 为受控枚举，新增实体类型需同时更新两个存储后端与同步顺序，
//! `Record` 上的 match 全部是穷举的，遗漏会在编译期暴露。

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::entities::{Block, Comment, Page, Permission, User, Workspace};
use crate::storage::window::SyncWindow;
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Workspace,
    Page,
    Block,
    Comment,
    Permission,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Workspace,
        EntityKind::Page,
        EntityKind::Block,
        EntityKind::Comment,
        EntityKind::Permission,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Workspace => "workspace",
            Self::Page => "page",
            Self::Block => "block",
            Self::Comment => "comment",
            Self::Permission => "permission",
        }
    }

    /// SQLite 表名，同时也是 sled 的 tree 名
    pub fn table_name(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Workspace => "workspaces",
            Self::Page => "pages",
            Self::Block => "blocks",
            Self::Comment => "comments",
            Self::Permission => "permissions",
        }
    }
}

impl FromStr for EntityKind {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "workspace" => Ok(Self::Workspace),
            "page" => Ok(Self::Page),
            "block" => Ok(Self::Block),
            "comment" => Ok(Self::Comment),
            "permission" => Ok(Self::Permission),
            other => Err(SwitchyardError::InvalidArgument(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 存储契约搬运的统一单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "data", rename_all = "snake_case")]
pub enum Record {
    User(User),
    Workspace(Workspace),
    Page(Page),
    Block(Block),
    Comment(Comment),
    Permission(Permission),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::User(_) => EntityKind::User,
            Record::Workspace(_) => EntityKind::Workspace,
            Record::Page(_) => EntityKind::Page,
            Record::Block(_) => EntityKind::Block,
            Record::Comment(_) => EntityKind::Comment,
            Record::Permission(_) => EntityKind::Permission,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Record::User(e) => e.id.0,
            Record::Workspace(e) => e.id.0,
            Record::Page(e) => e.id.0,
            Record::Block(e) => e.id.0,
            Record::Comment(e) => e.id.0,
            Record::Permission(e) => e.id.0,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Record::User(e) => e.created_at,
            Record::Workspace(e) => e.created_at,
            Record::Page(e) => e.created_at,
            Record::Block(e) => e.created_at,
            Record::Comment(e) => e.created_at,
            Record::Permission(e) => e.created_at,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Record::User(e) => e.updated_at,
            Record::Workspace(e) => e.updated_at,
            Record::Page(e) => e.updated_at,
            Record::Block(e) => e.updated_at,
            Record::Comment(e) => e.updated_at,
            Record::Permission(e) => e.updated_at,
        }
    }

    /// 把 updated_at 刷新为当前时间
    pub fn touch(&mut self) {
        let now = time::now();
        match self {
            Record::User(e) => e.updated_at = now,
            Record::Workspace(e) => e.updated_at = now,
            Record::Page(e) => e.updated_at = now,
            Record::Block(e) => e.updated_at = now,
            Record::Comment(e) => e.updated_at = now,
            Record::Permission(e) => e.updated_at = now,
        }
    }

    /// created_at 或 updated_at 落在窗口内
    pub fn modified_within(&self, window: &SyncWindow) -> bool {
        window.contains(&self.created_at()) || window.contains(&self.updated_at())
    }

    /// 所有时间字段截断到微秒；两个后端写入前都会调用
    pub fn normalized(mut self) -> Self {
        fn norm(ts: &mut DateTime<Utc>) {
            *ts = time::truncate_micros(*ts);
        }
        match &mut self {
            Record::User(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
            }
            Record::Workspace(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
            }
            Record::Page(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
            }
            Record::Block(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
            }
            Record::Comment(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
                if let Some(resolved) = e.resolved_at.as_mut() {
                    norm(resolved);
                }
            }
            Record::Permission(e) => {
                norm(&mut e.created_at);
                norm(&mut e.updated_at);
            }
        }
        self
    }

    /// 规范 JSON 的 SHA-256（十六进制），用于跨存储一致性校验。
    /// serde_json 的 Map 按 key 排序，序列化结果是确定的。
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.clone().normalized())?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entities::{Block, BlockType, PageId};

    #[test]
    fn entity_kind_as_str_and_from_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert_eq!(EntityKind::Block.table_name(), "blocks");
        assert!("group".parse::<EntityKind>().is_err());
    }

    #[test]
    fn record_is_tagged_on_the_wire() {
        let user = User::new("ann@example.com", "Ann");
        let json = serde_json::to_value(Record::from(user.clone())).unwrap();
        assert_eq!(json["entity_type"], "user");
        assert_eq!(json["data"]["email"], "ann@example.com");

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, Record::User(user));
    }

    #[test]
    fn digest_tracks_content() {
        let block = Block::new(PageId::new(), BlockType::Text, 0);
        let a = Record::Block(block.clone());
        let mut changed = block;
        changed.order = 7;
        let b = Record::Block(changed);

        assert_eq!(a.digest().unwrap(), a.clone().digest().unwrap());
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap().len(), 64);
    }

    #[test]
    fn modified_within_uses_either_timestamp() {
        let mut user = User::new("b@example.com", "B");
        let start = user.created_at;
        user.updated_at = start + chrono::Duration::hours(2);
        let record = Record::User(user);

        let around_update = SyncWindow::new(
            start + chrono::Duration::hours(1),
            start + chrono::Duration::hours(3),
        )
        .unwrap();
        assert!(record.modified_within(&around_update));

        let before = SyncWindow::new(start - chrono::Duration::hours(2), start).unwrap();
        assert!(!record.modified_within(&before));
    }
}
