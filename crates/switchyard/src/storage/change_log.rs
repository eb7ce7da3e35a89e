//! 变更日志（备选同步策略）
//!
//! 主存储在实体写入的同一事务里追加一条变更记录，payload 为带类型标签的
//! [`Record`]，回放时直接反序列化为实体，不经过无类型的 map。

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::record::{EntityKind, Record};
use crate::storage::window::SyncWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for ChangeOperation {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(SwitchyardError::InvalidArgument(format!(
                "unknown change operation: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// change_tracking 表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub kind: EntityKind,
    pub entity_id: Uuid,
    pub operation: ChangeOperation,
    pub changed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// 最近一次回放失败的原因；成功后清空
    pub error_message: String,
    pub retry_count: u32,
    /// create / update 携带完整记录；delete 为 None
    pub payload: Option<Record>,
}

impl ChangeRecord {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some() && self.error_message.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        !self.error_message.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub total: u64,
    pub processed: u64,
    pub pending: u64,
    pub failed: u64,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub latest_change: Option<DateTime<Utc>>,
}

/// 变更日志能力。由支持事务内追加的存储实现（目前是 `SqliteStore`）。
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// 手动追加一条变更，返回自增 id
    async fn record_change(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        operation: ChangeOperation,
        payload: Option<&Record>,
    ) -> Result<i64>;

    /// 尚未成功处理（未处理或带错误）的变更，按 id 升序
    async fn list_unprocessed_changes(&self, limit: usize) -> Result<Vec<ChangeRecord>>;

    /// `changed_at` 落在窗口内且 id 大于 `after_id` 的变更，按 id 升序（即提交顺序）
    async fn list_changes(
        &self,
        window: &SyncWindow,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>>;

    async fn mark_change_processed(&self, id: i64) -> Result<()>;

    /// 记录失败原因并 retry_count + 1
    async fn mark_change_error(&self, id: i64, message: &str) -> Result<()>;

    async fn change_stats(&self) -> Result<ChangeStats>;

    /// 清理 `before` 之前已成功处理的变更，返回删除条数
    async fn purge_processed_changes(&self, before: DateTime<Utc>) -> Result<u64>;
}
