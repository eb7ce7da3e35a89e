//! 变更日志重放
//!
//! 源端带变更日志时按 id（提交顺序）分页读取窗口内的变更：
//! create / update 写入完整的类型化记录，delete 在目标端删除（目标端已不存在视为成功）。
//! 每条变更处理后在源端标记为已处理或记录错误。源端没有变更日志时回退为时间戳追平。

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SwitchyardError};
use crate::storage::{ChangeOperation, ChangeRecord, Store, SyncWindow};
use crate::sync::report::{RecordOutcome, SyncReport};
use crate::sync::{apply_record, catch_up, SyncStrategy};

pub async fn replay_change_log(
    source: &dyn Store,
    destination: &dyn Store,
    window: &SyncWindow,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let Some(tracker) = source.change_tracker() else {
        info!(
            "ℹ️ {} 未开启变更日志，回退为时间戳追平",
            source.backend()
        );
        return catch_up(source, destination, window, cancel).await;
    };

    info!(
        "🔄 开始重放变更日志: {} -> {}, window={}",
        source.backend(),
        destination.backend(),
        window
    );
    let batch_size = batch_size.max(1);
    let mut report = SyncReport::new(SyncStrategy::ChangeTracking, *window);
    let mut after_id = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(SwitchyardError::Cancelled);
        }
        let changes = tracker.list_changes(window, after_id, batch_size).await?;
        let fetched = changes.len();
        debug!("📦 读取变更 {} 条 (after_id={})", fetched, after_id);

        for change in changes {
            after_id = change.id;
            report.kind_mut(change.kind).listed += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SwitchyardError::Cancelled),
                result = apply_change(destination, &change) => result,
            };
            match result {
                Ok(outcome) => {
                    tracker.mark_change_processed(change.id).await?;
                    report.record(change.kind, outcome);
                }
                Err(e) if e.is_connectivity() => {
                    error!("❌ 重放变更 {} 时存储不可用，终止: {}", change.id, e);
                    return Err(e);
                }
                Err(e) => {
                    let err = SwitchyardError::record_sync(change.kind, change.entity_id, &e);
                    warn!("⚠️ 变更 {} ({}) 重放失败: {}", change.id, change.operation, err);
                    tracker.mark_change_error(change.id, &err.to_string()).await?;
                    report.warn(change.kind);
                }
            }
        }

        if fetched < batch_size {
            break;
        }
    }

    report.finish();
    info!("✅ 变更日志重放完成: {}", report.summary());
    Ok(report)
}

async fn apply_change(destination: &dyn Store, change: &ChangeRecord) -> Result<RecordOutcome> {
    match change.operation {
        ChangeOperation::Create | ChangeOperation::Update => {
            let record = change.payload.as_ref().ok_or_else(|| {
                SwitchyardError::InvalidOperation(format!(
                    "change {} ({}) carries no payload",
                    change.id, change.operation
                ))
            })?;
            if record.kind() != change.kind || record.id() != change.entity_id {
                return Err(SwitchyardError::InvalidOperation(format!(
                    "change {} payload is {} {}, expected {} {}",
                    change.id,
                    record.kind(),
                    record.id(),
                    change.kind,
                    change.entity_id
                )));
            }
            apply_record(destination, record).await
        }
        ChangeOperation::Delete => match destination.delete(change.kind, change.entity_id).await {
            Ok(()) => Ok(RecordOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(RecordOutcome::Skipped),
            Err(e) => Err(e),
        },
    }
}
