// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use tracing_subscriber::EnvFilter;

/// 初始化日志: 遵循 RUST_LOG, 默认 info
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
