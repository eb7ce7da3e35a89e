//! 迁移模式状态机
//!
//! 保存 `{mode, roles_swapped}`，两者在同一把读写锁后面，读者总是拿到完整快照。
//! 锁只在拷贝或修改快照时持有，从不跨越 `.await`。

use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SwitchyardError};

/// 迁移阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// 主库读写（初始与最终状态）
    #[default]
    Single,
    /// 拒绝所有写入，读主库（短暂冻结窗口）
    ReadOnly,
    /// 读从库、写主库
    Switching,
    /// 读写都走从库，主库靠反向追平保持同步
    Reversed,
}

impl MigrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::ReadOnly => "read_only",
            Self::Switching => "switching",
            Self::Reversed => "reversed",
        }
    }

    /// 离开 read_only 只能去 switching 或 single
    pub fn can_transition_to(self, next: MigrationMode) -> bool {
        match self {
            Self::ReadOnly => matches!(next, Self::Switching | Self::Single),
            _ => true,
        }
    }
}

impl FromStr for MigrationMode {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(Self::Single),
            "read_only" | "readonly" => Ok(Self::ReadOnly),
            "switching" => Ok(Self::Switching),
            "reversed" => Ok(Self::Reversed),
            other => Err(SwitchyardError::InvalidArgument(format!(
                "unknown migration mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 某一时刻的完整模式状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSnapshot {
    pub mode: MigrationMode,
    /// true 表示物理上的第二个存储当前担任主库
    pub roles_swapped: bool,
}

#[derive(Debug, Default)]
pub struct MigrationState {
    inner: RwLock<ModeSnapshot>,
}

impl MigrationState {
    pub fn new(mode: MigrationMode) -> Self {
        Self {
            inner: RwLock::new(ModeSnapshot {
                mode,
                roles_swapped: false,
            }),
        }
    }

    pub fn get_mode(&self) -> MigrationMode {
        self.inner.read().mode
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        *self.inner.read()
    }

    pub fn is_read_only(&self) -> bool {
        self.get_mode() == MigrationMode::ReadOnly
    }

    /// 切换模式，返回之前的模式。非法切换时状态不变。
    pub fn set_mode(&self, next: MigrationMode) -> Result<MigrationMode> {
        let previous = {
            let mut state = self.inner.write();
            let current = state.mode;
            if !current.can_transition_to(next) {
                drop(state);
                warn!("⚠️ 拒绝非法模式切换: {} -> {}", current, next);
                return Err(SwitchyardError::InvalidTransition {
                    from: current,
                    to: next,
                });
            }
            state.mode = next;
            current
        };
        info!("🔄 迁移模式切换: {} -> {}", previous, next);
        Ok(previous)
    }

    /// 交换主从角色，返回交换后的 roles_swapped
    pub fn swap_roles(&self) -> bool {
        let swapped = {
            let mut state = self.inner.write();
            state.roles_swapped = !state.roles_swapped;
            state.roles_swapped
        };
        info!("🔄 主从角色已交换 (roles_swapped = {})", swapped);
        swapped
    }
}
