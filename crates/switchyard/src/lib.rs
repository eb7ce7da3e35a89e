//! Switchyard - 双存储零停机迁移协调器
//!
//! 在两个可独立访问的存储（关系型 SQLite、文档型 sled）之间迁移数据，全程不停服：
//! - 🔀 路由：按迁移阶段决定读写分别落在哪个存储
//! - 🔄 追平：按修改时间窗口或变更日志把一端的改动重放到另一端
//! - 🔒 只读守卫：切换前的短暂冻结窗口内拒绝写入
//! - ✅ 一致性校验：逐条比较两端记录摘要
//! - ⏰ 后台同步：固定间隔推进同步水位
//!
//! 两个存储从不处于同一个事务中，一致性依靠冻结窗口和幂等重放保证。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use switchyard::{
//!     BackendConfig, MigrationAdmin, MigrationMode, SwitchyardConfig, SyncCommand,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> switchyard::Result<()> {
//!     let config = SwitchyardConfig::builder()
//!         .primary(BackendConfig::Sqlite {
//!             path: "/var/lib/app/app.db".into(),
//!             change_tracking: true,
//!         })
//!         .secondary(BackendConfig::Sled {
//!             path: "/var/lib/app/docs".into(),
//!         })
//!         .build()?;
//!     switchyard::logging::init(config.debug_mode);
//!
//!     let admin = MigrationAdmin::open(config).await?;
//!     let cancel = CancellationToken::new();
//!
//!     // 应用代码只使用 admin.store()
//!     let _store = admin.store();
//!
//!     admin.set_mode(MigrationMode::ReadOnly)?;
//!     admin.run_sync(SyncCommand::forward(), &cancel).await?;
//!     admin.set_mode(MigrationMode::Switching)?;
//!     assert!(admin.verify(None, &cancel).await?.is_consistent());
//!     admin.set_mode(MigrationMode::Reversed)?;
//!     admin.run_sync(SyncCommand::reverse(), &cancel).await?;
//!     admin.swap_roles()?;
//!     admin.set_mode(MigrationMode::Single)?;
//!
//!     admin.close().await
//! }
//! ```

pub mod admin;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

pub use admin::{MigrationAdmin, MigrationStatus, StoreTopology, SyncCommand};
pub use config::{BackendConfig, SwitchyardConfig, SwitchyardConfigBuilder, SyncConfig};
pub use coordinator::{DualStore, MigrationMode, MigrationState, ModeSnapshot};
pub use error::{ErrorClass, Result, SwitchyardError};
pub use storage::{
    Block, BlockId, BlockType, ChangeOperation, ChangeRecord, ChangeStats, ChangeTracker, Comment,
    CommentId, Entity, EntityKind, ListQuery, Page, PageId, Permission, PermissionId,
    PermissionLevel, ReadOnlyStore, Record, ResourceType, SledStore, SqliteStore, Store, StoreExt,
    SyncWindow, User, UserId, Workspace, WorkspaceId,
};
pub use sync::{
    catch_up, replay_change_log, verify, SyncDirection, SyncReport, SyncStrategy, VerifyReport,
};
pub use version::{GIT_SHA, SWITCHYARD_VERSION};
