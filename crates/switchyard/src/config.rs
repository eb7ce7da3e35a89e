//! 配置：存储拓扑、初始模式与同步参数

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator::MigrationMode;
use crate::error::{Result, SwitchyardError};
use crate::storage::{SledStore, SqliteStore, Store};
use crate::sync::SyncStrategy;

/// 单个存储后端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// SQLite 文件
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        change_tracking: bool,
    },
    /// 内存 SQLite（测试、演练）
    SqliteMemory {
        #[serde(default)]
        change_tracking: bool,
    },
    /// sled 目录
    Sled { path: PathBuf },
    /// 进程结束即删除的 sled
    SledTemporary,
}

impl BackendConfig {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Sqlite { path, .. } | Self::Sled { path } => Some(path),
            Self::SqliteMemory { .. } | Self::SledTemporary => None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } | Self::SqliteMemory { .. } => crate::storage::sqlite::BACKEND_NAME,
            Self::Sled { .. } | Self::SledTemporary => crate::storage::document::BACKEND_NAME,
        }
    }

    pub fn has_change_tracking(&self) -> bool {
        matches!(
            self,
            Self::Sqlite {
                change_tracking: true,
                ..
            } | Self::SqliteMemory {
                change_tracking: true
            }
        )
    }

    /// 打开存储（不执行 schema 迁移）
    pub async fn open(&self) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self {
            Self::Sqlite {
                path,
                change_tracking,
            } => Arc::new(SqliteStore::open(path)?.with_change_tracking(*change_tracking)),
            Self::SqliteMemory { change_tracking } => {
                Arc::new(SqliteStore::open_in_memory()?.with_change_tracking(*change_tracking))
            }
            Self::Sled { path } => Arc::new(SledStore::open(path).await?),
            Self::SledTemporary => Arc::new(SledStore::open_temporary()?),
        };
        info!("🔌 已打开存储: {}", self);
        Ok(store)
    }
}

impl std::fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{}({})", self.backend_name(), path.display()),
            None => write!(f, "{}(memory)", self.backend_name()),
        }
    }
}

/// 同步配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub strategy: SyncStrategy,
    /// 后台同步间隔（秒）
    pub interval_secs: u64,
    /// 手动同步未给出 since 时的回溯时长（秒）
    pub default_lookback_secs: u64,
    /// 变更日志每批读取条数
    pub change_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::Timestamp,
            interval_secs: 60,
            default_lookback_secs: 24 * 60 * 60,
            change_batch_size: 1000,
        }
    }
}

/// Switchyard 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    /// 初始主库
    pub primary: BackendConfig,
    /// 迁移目标；None 表示单存储拓扑
    pub secondary: Option<BackendConfig>,
    pub initial_mode: MigrationMode,
    /// 运维强制只读
    pub read_only: bool,
    /// 打开后自动执行 schema 迁移
    pub auto_migrate: bool,
    pub sync: SyncConfig,
    /// 调试模式（DEBUG 日志）
    pub debug_mode: bool,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::Sqlite {
                path: get_default_data_dir().join("switchyard.db"),
                change_tracking: false,
            },
            secondary: None,
            initial_mode: MigrationMode::Single,
            read_only: false,
            auto_migrate: true,
            sync: SyncConfig::default(),
            debug_mode: false,
        }
    }
}

/// 默认数据目录 ~/.switchyard/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".switchyard")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".switchyard")
    } else {
        PathBuf::from(".switchyard")
    }
}

impl SwitchyardConfig {
    pub fn builder() -> SwitchyardConfigBuilder {
        SwitchyardConfigBuilder::new()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SwitchyardError::Config(format!("读取配置文件失败 {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            SwitchyardError::Config(format!("解析配置文件失败 {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(SwitchyardError::Config("sync.interval_secs must be > 0".into()));
        }
        if self.sync.default_lookback_secs == 0 {
            return Err(SwitchyardError::Config(
                "sync.default_lookback_secs must be > 0".into(),
            ));
        }
        if self.sync.change_batch_size == 0 {
            return Err(SwitchyardError::Config(
                "sync.change_batch_size must be > 0".into(),
            ));
        }

        match &self.secondary {
            None if matches!(
                self.initial_mode,
                MigrationMode::Switching | MigrationMode::Reversed
            ) =>
            {
                return Err(SwitchyardError::Config(format!(
                    "initial mode {} requires a secondary store",
                    self.initial_mode
                )));
            }
            Some(secondary) => {
                if let (Some(a), Some(b)) = (self.primary.path(), secondary.path()) {
                    if a == b {
                        return Err(SwitchyardError::Config(format!(
                            "primary and secondary share the same path: {}",
                            a.display()
                        )));
                    }
                }
                if self.sync.strategy == SyncStrategy::ChangeTracking
                    && !self.primary.has_change_tracking()
                    && !secondary.has_change_tracking()
                {
                    warn!("⚠️ 同步策略为 change_tracking，但两个存储都未开启变更日志，将回退为时间戳追平");
                }
            }
            None => {}
        }
        Ok(())
    }
}

/// 配置构建器
pub struct SwitchyardConfigBuilder {
    config: SwitchyardConfig,
}

impl Default for SwitchyardConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchyardConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SwitchyardConfig::default(),
        }
    }

    pub fn primary(mut self, backend: BackendConfig) -> Self {
        self.config.primary = backend;
        self
    }

    pub fn secondary(mut self, backend: BackendConfig) -> Self {
        self.config.secondary = Some(backend);
        self
    }

    pub fn initial_mode(mut self, mode: MigrationMode) -> Self {
        self.config.initial_mode = mode;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn auto_migrate(mut self, enabled: bool) -> Self {
        self.config.auto_migrate = enabled;
        self
    }

    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync.strategy = strategy;
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.interval_secs = secs;
        self
    }

    pub fn default_lookback_secs(mut self, secs: u64) -> Self {
        self.config.sync.default_lookback_secs = secs;
        self
    }

    pub fn change_batch_size(mut self, size: usize) -> Self {
        self.config.sync.change_batch_size = size;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> Result<SwitchyardConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_sqlite_with_a_day_of_lookback() {
        let config = SwitchyardConfig::default();
        assert!(!config.is_dual());
        assert_eq!(config.sync.default_lookback_secs, 86_400);
        assert_eq!(config.sync.change_batch_size, 1000);
        assert!(config.primary.path().unwrap().ends_with("switchyard.db"));
        config.validate().unwrap();
    }

    #[test]
    fn builder_validates() {
        let err = SwitchyardConfig::builder()
            .initial_mode(MigrationMode::Switching)
            .build()
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::Config(_)));

        let err = SwitchyardConfig::builder()
            .primary(BackendConfig::Sled { path: "/data/store".into() })
            .secondary(BackendConfig::Sled { path: "/data/store".into() })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("same path"));

        assert!(SwitchyardConfig::builder().sync_interval_secs(0).build().is_err());
    }

    #[test]
    fn reads_partial_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("switchyard.json");
        std::fs::write(
            &file,
            r#"{
                "primary": { "kind": "sqlite", "path": "/var/lib/app/app.db", "change_tracking": true },
                "secondary": { "kind": "sled", "path": "/var/lib/app/docs" },
                "initial_mode": "read_only",
                "sync": { "strategy": "change_tracking" }
            }"#,
        )
        .unwrap();

        let config = SwitchyardConfig::from_json_file(&file).unwrap();
        assert_eq!(config.initial_mode, MigrationMode::ReadOnly);
        assert!(config.primary.has_change_tracking());
        assert_eq!(config.sync.strategy, SyncStrategy::ChangeTracking);
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(
            config.secondary.unwrap().to_string(),
            "sled(/var/lib/app/docs)"
        );
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = SwitchyardConfig::from_json_file("/nonexistent/switchyard.json").unwrap_err();
        assert!(matches!(err, SwitchyardError::Config(_)));
    }

    #[tokio::test]
    async fn opens_in_memory_backends() {
        let sqlite = BackendConfig::SqliteMemory { change_tracking: true }.open().await.unwrap();
        sqlite.migrate_schema().await.unwrap();
        assert!(sqlite.change_tracker().is_some());

        let sled = BackendConfig::SledTemporary.open().await.unwrap();
        assert_eq!(sled.backend(), "sled");
        assert!(sled.change_tracker().is_none());
    }
}
