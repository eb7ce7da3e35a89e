//! 迁移运维入口
//!
//! 根据配置打开存储、组装单存储或双存储拓扑，并在外层套上只读守卫。
//! 只读谓词为 `强制只读 || mode == read_only`。
//!
//! 完整迁移流程（约定，不强制）：
//! `single(主=A)` → 后台同步 → `read_only` → 最后一次 forward_sync → `switching`
//! → verify → `reversed` → reverse_sync → `swap_roles()` + `single`(主=B)。
//! `swap_roles` 之前随时可以设回 `single` 回滚。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SwitchyardConfig;
use crate::coordinator::{DualStore, MigrationMode, MigrationState};
use crate::error::{Result, SwitchyardError};
use crate::storage::readonly::ReadOnlyPredicate;
use crate::storage::{ReadOnlyStore, Store, SyncWindow};
use crate::sync::{
    self, SchedulerHandle, SyncDirection, SyncReport, SyncScheduler, SyncStrategy, VerifyReport,
};
use crate::utils::time;
use crate::version;

/// 一次手动同步请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCommand {
    pub direction: SyncDirection,
    /// 缺省为 `until - 回溯时长`
    pub since: Option<DateTime<Utc>>,
    /// 缺省为当前时间
    pub until: Option<DateTime<Utc>>,
}

impl SyncCommand {
    pub fn forward() -> Self {
        Self {
            direction: SyncDirection::Forward,
            ..Self::default()
        }
    }

    pub fn reverse() -> Self {
        Self {
            direction: SyncDirection::Reverse,
            ..Self::default()
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// 从字符串参数解析（方向名 + RFC 3339 时间）
    pub fn parse(direction: &str, since: Option<&str>, until: Option<&str>) -> Result<Self> {
        Ok(Self {
            direction: direction.parse()?,
            since: since.map(time::parse_rfc3339).transpose()?,
            until: until.map(time::parse_rfc3339).transpose()?,
        })
    }

    pub fn window(&self, default_lookback: chrono::Duration) -> Result<SyncWindow> {
        let until = self.until.unwrap_or_else(time::now);
        let since = self.since.unwrap_or(until - default_lookback);
        SyncWindow::new(since, until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTopology {
    Single,
    Dual,
}

/// 状态查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub mode: MigrationMode,
    pub topology: StoreTopology,
    pub roles_swapped: bool,
    pub forced_read_only: bool,
    /// 守卫当前是否拒绝写入
    pub read_only: bool,
    pub primary_backend: String,
    pub secondary_backend: Option<String>,
    pub strategy: SyncStrategy,
    pub background_sync_running: bool,
    pub last_background_sync: Option<DateTime<Utc>>,
    pub version: String,
    pub git_sha: String,
}

enum Topology {
    Single(Arc<dyn Store>),
    Dual(Arc<DualStore>),
}

pub struct MigrationAdmin {
    config: SwitchyardConfig,
    state: Arc<MigrationState>,
    forced_read_only: Arc<AtomicBool>,
    topology: Topology,
    store: Arc<ReadOnlyStore<dyn Store>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl MigrationAdmin {
    /// 按配置打开存储；`auto_migrate` 时先执行 schema 迁移
    pub async fn open(config: SwitchyardConfig) -> Result<Self> {
        config.validate()?;
        let primary = config.primary.open().await?;
        let secondary = match &config.secondary {
            Some(backend) => Some(backend.open().await?),
            None => None,
        };
        if config.auto_migrate {
            primary.migrate_schema().await?;
            if let Some(secondary) = &secondary {
                secondary.migrate_schema().await?;
            }
        }
        Self::from_stores(config, primary, secondary)
    }

    /// 用已打开的存储组装
    pub fn from_stores(
        config: SwitchyardConfig,
        primary: Arc<dyn Store>,
        secondary: Option<Arc<dyn Store>>,
    ) -> Result<Self> {
        let state = Arc::new(MigrationState::new(config.initial_mode));
        let forced_read_only = Arc::new(AtomicBool::new(config.read_only));

        let (topology, inner): (Topology, Arc<dyn Store>) = match secondary {
            Some(secondary) => {
                let router = Arc::new(DualStore::new(primary, secondary, state.clone()));
                let inner: Arc<dyn Store> = router.clone();
                (Topology::Dual(router), inner)
            }
            None => {
                if matches!(
                    config.initial_mode,
                    MigrationMode::Switching | MigrationMode::Reversed
                ) {
                    return Err(SwitchyardError::Config(format!(
                        "initial mode {} requires a secondary store",
                        config.initial_mode
                    )));
                }
                (Topology::Single(primary.clone()), primary)
            }
        };

        let predicate: ReadOnlyPredicate = {
            let state = state.clone();
            let forced = forced_read_only.clone();
            Arc::new(move || forced.load(Ordering::SeqCst) || state.is_read_only())
        };
        let store = Arc::new(ReadOnlyStore::new(inner, predicate));

        info!(
            "✅ 迁移协调器就绪: topology={}, mode={}, forced_read_only={}",
            if matches!(topology, Topology::Dual(_)) { "dual" } else { "single" },
            config.initial_mode,
            config.read_only
        );
        Ok(Self {
            config,
            state,
            forced_read_only,
            topology,
            store,
            scheduler: Mutex::new(None),
        })
    }

    /// 应用代码使用的存储（已套只读守卫）
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn router(&self) -> Option<Arc<DualStore>> {
        match &self.topology {
            Topology::Dual(router) => Some(router.clone()),
            Topology::Single(_) => None,
        }
    }

    pub fn state(&self) -> &Arc<MigrationState> {
        &self.state
    }

    pub fn config(&self) -> &SwitchyardConfig {
        &self.config
    }

    pub fn topology(&self) -> StoreTopology {
        match self.topology {
            Topology::Single(_) => StoreTopology::Single,
            Topology::Dual(_) => StoreTopology::Dual,
        }
    }

    fn require_router(&self, operation: &str) -> Result<&Arc<DualStore>> {
        match &self.topology {
            Topology::Dual(router) => Ok(router),
            Topology::Single(_) => Err(SwitchyardError::InvalidOperation(format!(
                "{} requires a dual-store topology",
                operation
            ))),
        }
    }

    fn default_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.sync.default_lookback_secs as i64)
    }

    /// 执行一次同步（使用配置的策略）
    pub async fn run_sync(
        &self,
        command: SyncCommand,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let router = self.require_router("sync")?;
        if self.forced_read_only.load(Ordering::SeqCst) {
            warn!("⚠️ 强制只读期间拒绝同步");
            return Err(SwitchyardError::ReadOnlyViolation { operation: "sync" });
        }
        let window = command.window(self.default_lookback())?;
        info!("🔄 手动同步: direction={}, window={}", command.direction, window);
        router
            .sync_with_strategy(
                command.direction,
                self.config.sync.strategy,
                &window,
                self.config.sync.change_batch_size,
                cancel,
            )
            .await
    }

    /// 切换模式，返回之前的模式。单存储拓扑只允许 single / read_only。
    pub fn set_mode(&self, mode: MigrationMode) -> Result<MigrationMode> {
        if matches!(self.topology, Topology::Single(_))
            && matches!(mode, MigrationMode::Switching | MigrationMode::Reversed)
        {
            return Err(SwitchyardError::InvalidOperation(format!(
                "mode {} requires a dual-store topology",
                mode
            )));
        }
        self.state.set_mode(mode)
    }

    pub fn set_mode_str(&self, mode: &str) -> Result<MigrationMode> {
        self.set_mode(mode.parse()?)
    }

    /// 交换主从，返回交换后的 roles_swapped
    pub fn swap_roles(&self) -> Result<bool> {
        self.require_router("swap_roles")?;
        Ok(self.state.swap_roles())
    }

    /// 运维强制只读开关
    pub fn set_read_only(&self, read_only: bool) {
        let previous = self.forced_read_only.swap(read_only, Ordering::SeqCst);
        if previous != read_only {
            info!("🔒 强制只读: {} -> {}", previous, read_only);
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn status(&self) -> MigrationStatus {
        let snapshot = self.state.snapshot();
        let (primary_backend, secondary_backend) = match &self.topology {
            Topology::Single(store) => (store.backend().to_string(), None),
            Topology::Dual(router) => (
                router.primary().backend().to_string(),
                Some(router.secondary().backend().to_string()),
            ),
        };
        let (background_sync_running, last_background_sync) = match &*self.scheduler.lock() {
            Some(handle) => (
                handle.is_running(),
                handle.last_report().and_then(|r| r.finished_at),
            ),
            None => (false, None),
        };

        MigrationStatus {
            mode: snapshot.mode,
            topology: self.topology(),
            roles_swapped: snapshot.roles_swapped,
            forced_read_only: self.forced_read_only.load(Ordering::SeqCst),
            read_only: self.is_read_only(),
            primary_backend,
            secondary_backend,
            strategy: self.config.sync.strategy,
            background_sync_running,
            last_background_sync,
            version: version::SWITCHYARD_VERSION.to_string(),
            git_sha: version::GIT_SHA.to_string(),
        }
    }

    /// 比较当前主库与从库；窗口缺省为最近的回溯时长
    pub async fn verify(
        &self,
        window: Option<SyncWindow>,
        cancel: &CancellationToken,
    ) -> Result<VerifyReport> {
        let router = self.require_router("verify")?;
        let window = match window {
            Some(window) => window,
            None => SyncWindow::trailing(self.default_lookback())?,
        };
        let (primary, secondary) = router.endpoints(SyncDirection::Forward);
        sync::verify(primary.as_ref(), secondary.as_ref(), &window, cancel).await
    }

    /// 启动后台同步；第一次窗口从 `now - 回溯时长` 开始
    pub fn start_background_sync(&self) -> Result<()> {
        let router = self.require_router("background sync")?.clone();
        let mut slot = self.scheduler.lock();
        if slot.as_ref().map(SchedulerHandle::is_running).unwrap_or(false) {
            return Err(SwitchyardError::InvalidOperation(
                "background sync is already running".into(),
            ));
        }
        let scheduler = SyncScheduler::new(
            router,
            self.config.sync.strategy,
            Duration::from_secs(self.config.sync.interval_secs),
            self.config.sync.change_batch_size,
            time::now() - self.default_lookback(),
        )?
        .with_pause_flag(self.forced_read_only.clone());
        *slot = Some(scheduler.spawn());
        Ok(())
    }

    /// 停止后台同步；之前未运行时返回 false
    pub async fn stop_background_sync(&self) -> bool {
        let handle = self.scheduler.lock().take();
        match handle {
            Some(mut handle) => {
                let was_running = handle.is_running();
                handle.stop().await;
                was_running
            }
            None => false,
        }
    }

    pub async fn migrate_schema(&self) -> Result<()> {
        self.store.migrate_schema().await
    }

    pub async fn close(&self) -> Result<()> {
        self.stop_background_sync().await;
        self.store.close().await?;
        info!("✅ 迁移协调器已关闭");
        Ok(())
    }
}
