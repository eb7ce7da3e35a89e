//! 时间处理工具模块
//!
//! # 设计原则
//!
//! - **存储层**: SQLite 中所有时间字段使用 UTC 微秒时间戳（INTEGER）
//! - **业务层**: 统一使用 [`now()`] 生成时间，已截断到微秒
//! - **一致性**: sled 文档以 RFC3339 保存，截断到微秒后两端比特级一致，摘要可比较

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{Result, SwitchyardError};

/// 当前 UTC 时间（微秒精度）
pub fn now() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

/// 截断到微秒，丢弃纳秒部分
pub fn truncate_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

/// 向上取整到微秒；已是整微秒时原样返回
pub fn ceil_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_micros(dt);
    if floor < dt {
        floor + chrono::Duration::microseconds(1)
    } else {
        floor
    }
}

pub fn to_micros(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// 微秒时间戳转回 `DateTime`；超出可表示范围返回 None
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// 解析 RFC3339 时间字符串（管理命令的 since/until 参数）
pub fn parse_rfc3339(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|dt| truncate_micros(dt.with_timezone(&Utc)))
        .map_err(|e| {
            SwitchyardError::InvalidArgument(format!("invalid RFC3339 timestamp '{}': {}", input, e))
        })
}
