//! 默认日志订阅器。
//!
//! 库内部只通过 `tracing` 宏打点；是否以及如何输出由宿主进程决定。
//! 本模块为没有自建订阅器的宿主（命令行工具、集成测试）提供一个开箱即用的选择：
//! `fmt` 输出层 + `EnvFilter`，过滤规则取自 `RUST_LOG`，缺省为 `info`。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// 安装全局订阅器失败。
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 进程内已存在全局订阅器。
    #[error("global tracing subscriber already installed")]
    AlreadyInstalled,
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 全局订阅器；重复安装返回 [`LoggingError::AlreadyInstalled`]。
pub fn install_default_subscriber() -> Result<(), LoggingError> {
    if dispatcher::has_been_set() {
        return Err(LoggingError::AlreadyInstalled);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
