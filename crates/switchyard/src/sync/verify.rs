//! 一致性校验：逐条比较两端记录的内容摘要

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::{EntityKind, Store, SyncWindow};
use crate::sync::SYNC_ORDER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub window: SyncWindow,
    pub checked: usize,
    /// 源端存在、目标端缺失
    pub missing: Vec<RecordRef>,
    /// 两端摘要不同
    pub mismatched: Vec<RecordRef>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// 对源端窗口内修改过的每条记录，比较两端的 SHA-256 摘要。
/// 列举后源端已删除的记录不计入。任何存储错误都直接返回。
pub async fn verify(
    source: &dyn Store,
    destination: &dyn Store,
    window: &SyncWindow,
    cancel: &CancellationToken,
) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        window: *window,
        checked: 0,
        missing: Vec::new(),
        mismatched: Vec::new(),
    };

    for kind in SYNC_ORDER {
        let ids = source
            .list_modified_ids(kind, window)
            .await
            .map_err(|e| SwitchyardError::ListModified {
                kind,
                source: Box::new(e),
            })?;
        for id in ids {
            if cancel.is_cancelled() {
                return Err(SwitchyardError::Cancelled);
            }
            let Some(expected) = source.get(kind, id).await? else {
                continue;
            };
            report.checked += 1;
            match destination.get(kind, id).await? {
                None => report.missing.push(RecordRef { kind, id }),
                Some(actual) if actual.digest()? != expected.digest()? => {
                    report.mismatched.push(RecordRef { kind, id })
                }
                Some(_) => {}
            }
        }
    }

    if report.is_consistent() {
        info!(
            "✅ 一致性校验通过: {} -> {}, checked={}",
            source.backend(),
            destination.backend(),
            report.checked
        );
    } else {
        warn!(
            "⚠️ 一致性校验发现差异: checked={}, missing={}, mismatched={}",
            report.checked,
            report.missing.len(),
            report.mismatched.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;
    use crate::storage::{Block, Entity, StoreExt};
    use crate::sync::catch_up;

    #[tokio::test]
    async fn detects_missing_and_divergent_records() {
        let src = test_support::memory_sqlite().await;
        let dst = test_support::temporary_sled().await;
        let fixture = test_support::seed_page(src.as_ref()).await;
        let window = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();
        let cancel = CancellationToken::new();

        catch_up(src.as_ref(), dst.as_ref(), &window, &cancel).await.unwrap();
        let clean = verify(src.as_ref(), dst.as_ref(), &window, &cancel).await.unwrap();
        assert!(clean.is_consistent());
        assert_eq!(clean.checked, 3);

        // 只改目标端，制造分歧
        let mut drifted = fixture.workspace.clone();
        drifted.name = "Drifted".into();
        drifted.touch();
        dst.save(&drifted).await.unwrap();
        let late = Block::text(fixture.page.id, 0, "late");
        src.insert(&late).await.unwrap();

        let window = SyncWindow::trailing(chrono::Duration::hours(1)).unwrap();
        let report = verify(src.as_ref(), dst.as_ref(), &window, &cancel).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(
            report.mismatched,
            vec![RecordRef { kind: EntityKind::Workspace, id: fixture.workspace.id.0 }]
        );
        assert_eq!(
            report.missing,
            vec![RecordRef { kind: EntityKind::Block, id: late.id.0 }]
        );
    }
}
