//! 迁移协调器：模式状态机 + 双存储路由

pub mod mode;
pub mod router;

pub use mode::{MigrationMode, MigrationState, ModeSnapshot};
pub use router::DualStore;
