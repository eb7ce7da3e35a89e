use thiserror::Error;
use uuid::Uuid;

use crate::coordinator::MigrationMode;
use crate::storage::EntityKind;

#[derive(Debug, Error)]
pub enum SwitchyardError {
    /// 只读期间的写操作（迁移冻结窗口或运维强制只读）
    #[error("operation denied: {operation} rejected while the store is read-only")]
    ReadOnlyViolation { operation: &'static str },

    #[error("invalid mode transition: {from} -> {to}")]
    InvalidTransition {
        from: MigrationMode,
        to: MigrationMode,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// 追平同步第一步（列举变更 id）失败，整轮同步终止
    #[error("failed to list modified {kind} records: {source}")]
    ListModified {
        kind: EntityKind,
        #[source]
        source: Box<SwitchyardError>,
    },

    /// 单条记录同步失败，只记 warn 不终止
    #[error("failed to sync {kind} {id}: {reason}")]
    RecordSync {
        kind: EntityKind,
        id: Uuid,
        reason: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IO(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// 面向 API 调用方的错误分类（4xx / 5xx）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 调用方可修正的请求（只读、非法切换、参数错误等）
    Client,
    /// 存储或连接侧故障
    Server,
}

impl From<serde_json::Error> for SwitchyardError {
    fn from(error: serde_json::Error) -> Self {
        SwitchyardError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SwitchyardError {
    fn from(error: std::io::Error) -> Self {
        SwitchyardError::IO(error.to_string())
    }
}

impl From<sled::Error> for SwitchyardError {
    fn from(error: sled::Error) -> Self {
        match error {
            sled::Error::Io(e) => SwitchyardError::StoreUnavailable(format!("sled io: {}", e)),
            other => SwitchyardError::KvStore(other.to_string()),
        }
    }
}

impl SwitchyardError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SwitchyardError::ReadOnlyViolation { .. }
            | SwitchyardError::InvalidTransition { .. }
            | SwitchyardError::NotFound(_)
            | SwitchyardError::AlreadyExists(_)
            | SwitchyardError::InvalidArgument(_)
            | SwitchyardError::InvalidOperation(_)
            | SwitchyardError::Config(_) => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }

    /// 是否属于连接层故障（同步时遇到即终止整轮，而不是逐条 warn）
    pub fn is_connectivity(&self) -> bool {
        match self {
            SwitchyardError::StoreUnavailable(_) | SwitchyardError::IO(_) => true,
            SwitchyardError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::NotADatabase
            ),
            SwitchyardError::ListModified { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    pub fn is_read_only_violation(&self) -> bool {
        matches!(self, SwitchyardError::ReadOnlyViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SwitchyardError::NotFound(_))
    }

    /// 记录级同步失败，保留原因文本
    pub fn record_sync(kind: EntityKind, id: Uuid, cause: &SwitchyardError) -> Self {
        SwitchyardError::RecordSync {
            kind,
            id,
            reason: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_classes() {
        let ro = SwitchyardError::ReadOnlyViolation { operation: "create" };
        assert_eq!(ro.class(), ErrorClass::Client);
        assert!(ro.is_read_only_violation());

        let transition = SwitchyardError::InvalidTransition {
            from: MigrationMode::ReadOnly,
            to: MigrationMode::Reversed,
        };
        assert_eq!(transition.class(), ErrorClass::Client);
        assert_eq!(transition.to_string(), "invalid mode transition: read_only -> reversed");

        let down = SwitchyardError::StoreUnavailable("closed".into());
        assert_eq!(down.class(), ErrorClass::Server);
        assert!(down.is_connectivity());
    }

    #[test]
    fn listing_failure_inherits_connectivity() {
        let wrapped = SwitchyardError::ListModified {
            kind: EntityKind::Page,
            source: Box::new(SwitchyardError::StoreUnavailable("gone".into())),
        };
        assert!(wrapped.is_connectivity());

        let wrapped = SwitchyardError::ListModified {
            kind: EntityKind::Page,
            source: Box::new(SwitchyardError::Serialization("bad row".into())),
        };
        assert!(!wrapped.is_connectivity());
    }

    #[test]
    fn busy_sqlite_is_connectivity() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(SwitchyardError::from(busy).is_connectivity());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!SwitchyardError::from(constraint).is_connectivity());
    }
}
