//! 日志初始化

use tracing::Level;

/// 安装全局 fmt 订阅者；已安装过时直接返回 false
pub fn init(debug_mode: bool) -> bool {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_a_no_op() {
        super::init(true);
        assert!(!super::init(false));
    }
}
