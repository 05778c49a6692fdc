/*!
 * 日志初始化
 *
 * 进程级日志使用 tracing；每个流水线阶段另有自己的 StageLog 收集器。
 */

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<bool> = OnceCell::new();

/// 初始化 tracing fmt 订阅者
///
/// `filter` 使用 `EnvFilter` 语法（例如 `"bucket_store=debug,info"`）；
/// 设置了 `RUST_LOG` 时以环境变量为准。可以重复调用，只有第一次生效。
/// 返回本次调用是否安装了订阅者。
pub fn init_tracing(filter: &str) -> bool {
    let mut installed_now = false;
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        installed_now = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
            .is_ok();
        installed_now
    });
    installed_now
}

/// 初始化 JSON 格式输出（用于日志采集）
pub fn init_json_tracing(filter: &str) -> bool {
    let mut installed_now = false;
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        installed_now = tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .try_init()
            .is_ok();
        installed_now
    });
    installed_now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
        assert!(!init_json_tracing("debug"));
    }
}
