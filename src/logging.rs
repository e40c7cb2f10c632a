use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// 安装全局 tracing 订阅器。
///
/// 优先使用 `RUST_LOG`，否则回退到配置中的级别（`phi_card=<level>`）。
/// 重复调用无副作用。
pub fn init_tracing(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("phi_card={}", config.level).into());

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let result = if config.format.eq_ignore_ascii_case("compact") {
            builder.compact().try_init()
        } else {
            builder.try_init()
        };

        // 测试或宿主程序可能已安装订阅器
        if let Err(e) = result {
            eprintln!("tracing 订阅器已存在，跳过初始化: {e}");
        }
    });
}
