//! 同步窗口：按修改时间的半开区间 `[since, until)`

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchyardError};
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SyncWindow {
    /// `since > until` 视为参数错误；`since == until` 是合法的空窗口。
    /// 记录时间都是整微秒，两端向上取整后包含的记录集合不变。
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self> {
        if since > until {
            return Err(SwitchyardError::InvalidArgument(format!(
                "sync window start {} is after its end {}",
                since.to_rfc3339(),
                until.to_rfc3339()
            )));
        }
        Ok(Self {
            since: time::ceil_micros(since),
            until: time::ceil_micros(until),
        })
    }

    /// 以当前时间为终点、向前 `lookback` 的窗口
    pub fn trailing(lookback: Duration) -> Result<Self> {
        let until = time::now();
        Self::new(until - lookback, until)
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.since && *ts < self.until
    }

    pub fn is_empty(&self) -> bool {
        self.since == self.until
    }

    pub fn since_micros(&self) -> i64 {
        time::to_micros(&self.since)
    }

    pub fn until_micros(&self) -> i64 {
        time::to_micros(&self.until)
    }
}

impl std::fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.since.to_rfc3339(), self.until.to_rfc3339())
    }
}
