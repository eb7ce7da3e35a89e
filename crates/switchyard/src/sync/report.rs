//! 同步结果统计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{EntityKind, SyncWindow};
use crate::sync::{SyncDirection, SyncStrategy};
use crate::utils::time;

/// 单条记录的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    Updated,
    /// 两端内容一致，未写入
    Unchanged,
    Deleted,
    /// 列举后源端已不存在，或删除时目标端已不存在
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindReport {
    pub kind: EntityKind,
    /// 列举到的 id 数（变更日志策略下为变更条数）
    pub listed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    /// 以警告记录、未中断同步的失败
    pub warned: usize,
}

impl KindReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            listed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            skipped: 0,
            warned: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged + self.deleted + self.skipped
    }

    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Unchanged => self.unchanged += 1,
            RecordOutcome::Deleted => self.deleted += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// 一次同步的完整结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub strategy: SyncStrategy,
    /// 通过路由发起时填写
    pub direction: Option<SyncDirection>,
    pub window: SyncWindow,
    pub kinds: Vec<KindReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(strategy: SyncStrategy, window: SyncWindow) -> Self {
        Self {
            strategy,
            direction: None,
            window,
            kinds: Vec::new(),
            started_at: time::now(),
            finished_at: None,
        }
    }

    pub fn kind(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindReport {
        let pos = match self.kinds.iter().position(|k| k.kind == kind) {
            Some(pos) => pos,
            None => {
                self.kinds.push(KindReport::new(kind));
                self.kinds.len() - 1
            }
        };
        &mut self.kinds[pos]
    }

    pub fn record(&mut self, kind: EntityKind, outcome: RecordOutcome) {
        self.kind_mut(kind).record(outcome);
    }

    pub fn warn(&mut self, kind: EntityKind) {
        self.kind_mut(kind).warned += 1;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(time::now());
    }

    pub fn processed(&self) -> usize {
        self.kinds.iter().map(KindReport::processed).sum()
    }

    pub fn warned(&self) -> usize {
        self.kinds.iter().map(|k| k.warned).sum()
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "strategy={}, window={}, processed={}, warned={}",
            self.strategy,
            self.window,
            self.processed(),
            self.warned()
        )];
        if let Some(direction) = self.direction {
            parts.push(format!("direction={}", direction));
        }
        for k in &self.kinds {
            parts.push(format!(
                "{}: +{} ~{} ={} -{} skip={} warn={}",
                k.kind, k.created, k.updated, k.unchanged, k.deleted, k.skipped, k.warned
            ));
        }
        parts.join("; ")
    }
}
