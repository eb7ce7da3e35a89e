//! 版本与运行时元信息
//!
//! - **Crate Version** → Cargo.toml（唯一权威源）
//! - **SQLite Schema Version** → migrations 文件（文件即版本，由 refinery 自动管理）
//! - **Build Metadata** → vergen 在 build.rs 中生成

/// crate semver，来自 Cargo.toml
pub const SWITCHYARD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 当前代码支持的最高 SQLite migration 版本（refinery_schema_history.version）。
/// 由 build.rs 扫描 migrations/ 下 V{version}__*.sql 取最大值生成。
/// 打开数据库时若 DB 版本高于此值则拒绝（防止回滚部署后 schema 不兼容）。
pub const SQLITE_SCHEMA_VERSION: i64 = parse_schema_version(env!("SQLITE_SCHEMA_VERSION"));

/// sled 文档库的结构版本，写在 meta 树中
pub const DOCUMENT_SCHEMA_VERSION: i64 = 1;

/// 编译期解析版本号字符串为 i64（build.rs 只会输出纯数字）
const fn parse_schema_version(s: &str) -> i64 {
    let b = s.as_bytes();
    let mut v = 0i64;
    let mut i = 0usize;
    while i < b.len() {
        if b[i] >= b'0' && b[i] <= b'9' {
            v = v * 10 + (b[i] - b'0') as i64;
        }
        i += 1;
    }
    v
}
