//! 后台同步调度
//!
//! 固定间隔触发（首次触发在启动后一个间隔），每次同步 `[watermark, now)`，
//! 方向取路由当前的 `catch_up_direction()`。成功后水位推进到 `now`；
//! 失败时水位不动，下一次窗口与之重叠，重放本身幂等。
//! 暂停标志置位期间（运维强制只读）触发照常计数，但不做同步、不动水位。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::DualStore;
use crate::error::{Result, SwitchyardError};
use crate::storage::SyncWindow;
use crate::sync::{SyncReport, SyncStrategy};
use crate::utils::time;

pub struct SyncScheduler {
    router: Arc<DualStore>,
    strategy: SyncStrategy,
    period: Duration,
    batch_size: usize,
    watermark: DateTime<Utc>,
    paused: Option<Arc<AtomicBool>>,
}

/// 调度任务与外部共享的状态
#[derive(Default)]
struct Shared {
    watermark: Mutex<Option<DateTime<Utc>>>,
    last_report: Mutex<Option<SyncReport>>,
    last_error: Mutex<Option<String>>,
    ticks: AtomicU64,
}

impl SyncScheduler {
    /// `watermark` 是第一次同步窗口的起点
    pub fn new(
        router: Arc<DualStore>,
        strategy: SyncStrategy,
        period: Duration,
        batch_size: usize,
        watermark: DateTime<Utc>,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(SwitchyardError::InvalidArgument(
                "sync interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            router,
            strategy,
            period,
            batch_size,
            watermark: time::truncate_micros(watermark),
            paused: None,
        })
    }

    /// 标志为 true 时跳过本次触发
    pub fn with_pause_flag(mut self, paused: Arc<AtomicBool>) -> Self {
        self.paused = Some(paused);
        self
    }

    fn is_paused(&self) -> bool {
        self.paused
            .as_ref()
            .map(|p| p.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn spawn(self) -> SchedulerHandle {
        let shared = Arc::new(Shared::default());
        *shared.watermark.lock() = Some(self.watermark);
        let cancel = CancellationToken::new();

        info!(
            "⏰ 启动后台同步: strategy={}, interval={:?}, since={}",
            self.strategy,
            self.period,
            self.watermark.to_rfc3339()
        );
        let task = tokio::spawn(self.run(shared.clone(), cancel.clone()));
        SchedulerHandle {
            shared,
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, shared: Arc<Shared>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            shared.ticks.fetch_add(1, Ordering::Relaxed);
            if self.is_paused() {
                debug!("⏸️ 强制只读中，跳过本次后台同步");
                continue;
            }

            match self.run_once(&shared, &cancel).await {
                Ok(()) => {}
                Err(SwitchyardError::Cancelled) => break,
                Err(e) => {
                    warn!("⚠️ 后台同步失败，水位保持不变: {}", e);
                    *shared.last_error.lock() = Some(e.to_string());
                }
            }
        }
        info!("🛑 后台同步已停止");
    }

    async fn run_once(&self, shared: &Shared, cancel: &CancellationToken) -> Result<()> {
        let since = shared.watermark.lock().unwrap_or(self.watermark);
        let until = time::now();
        let window = SyncWindow::new(since, until)?;
        let direction = self.router.catch_up_direction();
        debug!("🔄 后台同步 {} window={}", direction, window);

        let report = self
            .router
            .sync_with_strategy(direction, self.strategy, &window, self.batch_size, cancel)
            .await?;

        *shared.watermark.lock() = Some(until);
        *shared.last_report.lock() = Some(report);
        *shared.last_error.lock() = None;
        Ok(())
    }
}

/// 运行中的后台同步任务
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// 下一次同步窗口的起点（最近一次成功同步的终点）
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        *self.shared.watermark.lock()
    }

    /// 已触发的次数（含失败）
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.shared.last_report.lock().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// 取消并等待任务退出；进行中的同步在下一个检查点返回
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("⚠️ 后台同步任务异常退出: {}", e);
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
