//! 领域实体定义 - 笔记应用的六类实体
//!
//! 每个实体都有 UUID 主键、`created_at`、`updated_at`（微秒精度）。
//! 主键为各自独立的新类型，避免把 PageId 传给需要 BlockId 的地方。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::record::{EntityKind, Record};
use crate::utils::time;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// 生成新的随机 id（UUID v4）
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = SwitchyardError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    SwitchyardError::InvalidArgument(format!(
                        "invalid {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }
    };
}

typed_id!(UserId);
typed_id!(WorkspaceId);
typed_id!(PageId);
typed_id!(BlockId);
typed_id!(CommentId);
typed_id!(PermissionId);

/// 受控字符串枚举：serde / as_str / FromStr / Display 保持同一套取值
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = SwitchyardError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(SwitchyardError::InvalidArgument(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// 块类型
    BlockType {
        Text => "text",
        Heading => "heading",
        List => "list",
        Code => "code",
        Image => "image",
        Table => "table",
        Todo => "todo",
    }
);

string_enum!(
    /// 权限级别：admin 包含 write，write 包含 read
    PermissionLevel {
        Read => "read",
        Write => "write",
        Admin => "admin",
    }
);

string_enum!(
    /// 权限作用的资源类型
    ResourceType {
        Workspace => "workspace",
        Page => "page",
    }
);

impl PermissionLevel {
    fn rank(self) -> u8 {
        match self {
            Self::Read => 1,
            Self::Write => 2,
            Self::Admin => 3,
        }
    }

    /// 当前级别是否满足 `required`
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self.rank() >= required.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        let now = time::now();
        Self {
            id: UserId::new(),
            email: email.into(),
            name: name.into(),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Self {
        let now = time::now();
        Self {
            id: WorkspaceId::new(),
            name: name.into(),
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub parent_page_id: Option<PageId>,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    pub created_by: UserId,
    /// 自由属性（JSON 对象）
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(workspace_id: WorkspaceId, title: impl Into<String>, created_by: UserId) -> Self {
        let now = time::now();
        Self {
            id: PageId::new(),
            workspace_id,
            parent_page_id: None,
            title: title.into(),
            icon: None,
            cover_image: None,
            created_by,
            properties: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent: PageId) -> Self {
        self.parent_page_id = Some(parent);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub page_id: PageId,
    pub block_type: BlockType,
    #[serde(default)]
    pub content: Map<String, Value>,
    /// 页内排序位置
    pub order: i64,
    #[serde(default)]
    pub parent_block_id: Option<BlockId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    pub fn new(page_id: PageId, block_type: BlockType, order: i64) -> Self {
        let now = time::now();
        Self {
            id: BlockId::new(),
            page_id,
            block_type,
            content: Map::new(),
            order,
            parent_block_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 文本块的便捷构造：content = {"text": ...}
    pub fn text(page_id: PageId, order: i64, text: impl Into<String>) -> Self {
        let mut block = Self::new(page_id, BlockType::Text, order);
        block.content.insert("text".to_string(), Value::String(text.into()));
        block
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub block_id: BlockId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(block_id: BlockId, user_id: UserId, content: impl Into<String>) -> Self {
        let now = time::now();
        Self {
            id: CommentId::new(),
            block_id,
            user_id,
            content: content.into(),
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub user_id: UserId,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(
        resource_type: ResourceType,
        resource_id: Uuid,
        user_id: UserId,
        level: PermissionLevel,
    ) -> Self {
        let now = time::now();
        Self {
            id: PermissionId::new(),
            resource_type,
            resource_id,
            user_id,
            level,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 实体与 [`Record`] 之间的静态映射，供 `StoreExt` 的泛型方法使用
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    const KIND: EntityKind;

    fn uuid(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn touch(&mut self);
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Result<Self>;
}

macro_rules! impl_entity {
    ($ty:ident, $kind:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn uuid(&self) -> Uuid {
                self.id.0
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }

            /// 刷新 updated_at
            fn touch(&mut self) {
                self.updated_at = time::now();
            }

            fn into_record(self) -> Record {
                Record::$kind(self)
            }

            fn from_record(record: Record) -> Result<Self> {
                match record {
                    Record::$kind(inner) => Ok(inner),
                    other => Err(SwitchyardError::InvalidArgument(format!(
                        "expected {} record, got {}",
                        EntityKind::$kind,
                        other.kind()
                    ))),
                }
            }
        }

        impl From<$ty> for Record {
            fn from(entity: $ty) -> Self {
                Record::$kind(entity)
            }
        }
    };
}

impl_entity!(User, User);
impl_entity!(Workspace, Workspace);
impl_entity!(Page, Page);
impl_entity!(Block, Block);
impl_entity!(Comment, Comment);
impl_entity!(Permission, Permission);
