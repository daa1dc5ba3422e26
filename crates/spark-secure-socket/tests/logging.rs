//! 全局订阅器安装只能在独立进程中验证，因此单独成为一个集成测试目标。

use spark_secure_socket::{LoggingError, install_default_subscriber};

#[test]
fn default_subscriber_installs_once() {
    install_default_subscriber().expect("首次安装默认订阅器失败");
    tracing::info!("default subscriber installed");
    let err = install_default_subscriber().expect_err("重复安装应当失败");
    assert!(matches!(err, LoggingError::AlreadyInstalled));
}
