//! 时间戳追平
//!
//! 按 `SYNC_ORDER` 逐类型列举源端窗口内修改过的 id，逐条取完整记录写入目标端。
//! 单条失败记警告后继续；列举失败或连接类错误终止整次同步。

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SwitchyardError};
use crate::storage::{EntityKind, Store, SyncWindow};
use crate::sync::report::{RecordOutcome, SyncReport};
use crate::sync::{apply_record, SyncStrategy, SYNC_ORDER};

pub async fn catch_up(
    source: &dyn Store,
    destination: &dyn Store,
    window: &SyncWindow,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    info!(
        "🔄 开始追平: {} -> {}, window={}",
        source.backend(),
        destination.backend(),
        window
    );
    let mut report = SyncReport::new(SyncStrategy::Timestamp, *window);

    for kind in SYNC_ORDER {
        if cancel.is_cancelled() {
            info!("🛑 追平已取消（{} 之前）", kind);
            return Err(SwitchyardError::Cancelled);
        }
        sync_kind(source, destination, kind, window, cancel, &mut report).await?;
    }

    report.finish();
    info!("✅ 追平完成: {}", report.summary());
    Ok(report)
}

async fn sync_kind(
    source: &dyn Store,
    destination: &dyn Store,
    kind: EntityKind,
    window: &SyncWindow,
    cancel: &CancellationToken,
    report: &mut SyncReport,
) -> Result<()> {
    let ids = source
        .list_modified_ids(kind, window)
        .await
        .map_err(|e| {
            error!("❌ 列举 {} 失败，终止追平: {}", kind, e);
            SwitchyardError::ListModified {
                kind,
                source: Box::new(e),
            }
        })?;
    report.kind_mut(kind).listed = ids.len();
    debug!("📦 {}: 窗口内 {} 条", kind, ids.len());

    for id in ids {
        if cancel.is_cancelled() {
            return Err(SwitchyardError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwitchyardError::Cancelled),
            result = sync_record(source, destination, kind, id) => result,
        };
        match result {
            Ok(outcome) => report.record(kind, outcome),
            Err(e) if e.is_connectivity() => {
                error!("❌ 同步 {} {} 时存储不可用，终止追平: {}", kind, id, e);
                return Err(e);
            }
            Err(e) => {
                warn!("⚠️ {}", SwitchyardError::record_sync(kind, id, &e));
                report.warn(kind);
            }
        }
    }
    Ok(())
}

async fn sync_record(
    source: &dyn Store,
    destination: &dyn Store,
    kind: EntityKind,
    id: Uuid,
) -> Result<RecordOutcome> {
    let Some(record) = source.get(kind, id).await? else {
        debug!("{} {} 在列举后已被删除，跳过", kind, id);
        return Ok(RecordOutcome::Skipped);
    };
    apply_record(destination, &record).await
}
