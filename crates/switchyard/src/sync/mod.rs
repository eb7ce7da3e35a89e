/// 追平同步模块
///
/// 职责：
/// - 按时间窗口把源存储上的创建/更新重放到目标存储（catch_up）
/// - 按变更日志重放创建/更新/删除（change_replay）
/// - 逐条比对两端摘要（verify）
/// - 周期性后台同步并推进水位（scheduler）
///
/// 同步本身无状态：每次调用传入存储引用、窗口和取消令牌。
pub mod catch_up;
pub mod change_replay;
pub mod report;
pub mod scheduler;
pub mod verify;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchyardError};
use crate::storage::{EntityKind, Record, Store};

pub use catch_up::catch_up;
pub use change_replay::replay_change_log;
pub use report::{KindReport, RecordOutcome, SyncReport};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use verify::{verify, RecordRef, VerifyReport};

/// 同步顺序：被引用的实体先落库
pub const SYNC_ORDER: [EntityKind; 6] = EntityKind::ALL;

/// 同步方向
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// 主库 → 从库
    #[default]
    Forward,
    /// 从库 → 主库
    Reverse,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Self::Forward),
            "reverse" => Ok(Self::Reverse),
            other => Err(SwitchyardError::InvalidArgument(format!(
                "unknown sync direction: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同步策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// 按 created_at / updated_at 窗口追平（不传播删除）
    #[default]
    Timestamp,
    /// 按变更日志重放（传播删除）
    ChangeTracking,
}

impl SyncStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::ChangeTracking => "change_tracking",
        }
    }
}

impl FromStr for SyncStrategy {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timestamp" => Ok(Self::Timestamp),
            "change_tracking" => Ok(Self::ChangeTracking),
            other => Err(SwitchyardError::InvalidArgument(format!(
                "unknown sync strategy: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 把一条完整记录写到目标：不存在则创建，内容相同则跳过，否则覆盖
pub(crate) async fn apply_record(destination: &dyn Store, record: &Record) -> Result<RecordOutcome> {
    let record = record.clone().normalized();
    match destination.get(record.kind(), record.id()).await? {
        None => {
            destination.create(&record).await?;
            Ok(RecordOutcome::Created)
        }
        Some(existing) => {
            if existing.normalized() == record {
                return Ok(RecordOutcome::Unchanged);
            }
            destination.update(&record).await?;
            Ok(RecordOutcome::Updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for d in [SyncDirection::Forward, SyncDirection::Reverse] {
            assert_eq!(d.as_str().parse::<SyncDirection>().unwrap(), d);
        }
        for s in [SyncStrategy::Timestamp, SyncStrategy::ChangeTracking] {
            assert_eq!(s.as_str().parse::<SyncStrategy>().unwrap(), s);
            assert_eq!(serde_json::to_string(&s).unwrap(), format!("\"{}\"", s));
        }
        assert!("sideways".parse::<SyncDirection>().is_err());
    }

    #[test]
    fn users_sync_before_anything_that_references_them() {
        assert_eq!(SYNC_ORDER[0], EntityKind::User);
        assert_eq!(SYNC_ORDER[5], EntityKind::Permission);
        let page = SYNC_ORDER.iter().position(|k| *k == EntityKind::Page).unwrap();
        let block = SYNC_ORDER.iter().position(|k| *k == EntityKind::Block).unwrap();
        assert!(page < block);
    }

    #[tokio::test]
    async fn apply_record_creates_skips_identical_and_overwrites() {
        use crate::storage::test_support::{self, CountingStore};
        use crate::storage::{Page, StoreExt, UserId, WorkspaceId};

        let dst = CountingStore::new(test_support::temporary_sled().await);
        let mut page = Page::new(WorkspaceId::new(), "A", UserId::new());
        let record = Record::Page(page.clone());

        assert_eq!(apply_record(&dst, &record).await.unwrap(), RecordOutcome::Created);
        dst.reset_calls();
        assert_eq!(apply_record(&dst, &record).await.unwrap(), RecordOutcome::Unchanged);
        assert_eq!(dst.write_calls(), 0);

        page.title = "B".into();
        let outcome = apply_record(&dst, &Record::Page(page.clone())).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Updated);
        let copied: Page = dst.fetch(page.id).await.unwrap().unwrap();
        assert_eq!(copied.title, "B");
    }
}
