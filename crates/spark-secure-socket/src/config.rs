use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{certificate::CertificatePaths, error::ConfigError, trust_store::TrustStore};

/// 默认重试上限。
///
/// 数值看似夸张，但部分平台的客户端在握手完成前会产生约五万次“would block”结果，
/// 上限必须远高于此。
pub const DEFAULT_MAX_RETRY: u32 = 100_000;

/// 安全通道配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把重试上限、信任库位置、两段限流/排空停顿与服务端证书集中到一处，
///   既可以在代码中构造，也可以从 TOML 装载；
/// - profile 目录解析属于外部职责，这里只接收解析好的路径。
///
/// ## 契约（What）
/// - 所有字段都有默认值，空 TOML 即得到默认配置；
/// - `trust_store` 未显式指定时，按 `<profile_dir>/SSL/Fingerprints/TrustedServers.txt` 定位；
/// - 服务端模式要求 `certificate` 存在，否则上下文构造失败并报告“未指定证书”。
///
/// ## 示例
/// ```toml
/// max_retry = 50000
/// profile_dir = "/home/user/.synergy"
/// accept_failure_pause_ms = 1000
///
/// [certificate]
/// certificate = "/home/user/.synergy/SSL/Synergy.pem"
/// private_key = "/home/user/.synergy/SSL/Synergy.pem"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecureSocketConfig {
    pub max_retry: u32,
    pub profile_dir: PathBuf,
    pub trust_store: Option<PathBuf>,
    /// 客户端会话使用的 SNI 名称。
    pub server_name: String,
    pub accept_failure_pause_ms: u64,
    pub teardown_linger_ms: u64,
    pub certificate: Option<CertificatePaths>,
}

impl Default for SecureSocketConfig {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            profile_dir: PathBuf::from("."),
            trust_store: None,
            server_name: "localhost".to_owned(),
            accept_failure_pause_ms: 1000,
            teardown_linger_ms: 1000,
            certificate: None,
        }
    }
}

impl SecureSocketConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_profile_dir(mut self, profile_dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = profile_dir.into();
        self
    }

    pub fn with_trust_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_store = Some(path.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_certificate(mut self, paths: CertificatePaths) -> Self {
        self.certificate = Some(paths);
        self
    }

    /// 同时设置两段停顿；测试中通常置零。
    ///
    /// 超出 `u64` 毫秒表示范围的时长饱和为 `u64::MAX`。
    pub fn with_pauses(mut self, accept_failure: Duration, teardown_linger: Duration) -> Self {
        self.accept_failure_pause_ms = saturating_millis(accept_failure);
        self.teardown_linger_ms = saturating_millis(teardown_linger);
        self
    }

    pub fn trust_store(&self) -> TrustStore {
        match &self.trust_store {
            Some(path) => TrustStore::new(path.clone()),
            None => TrustStore::for_profile(&self.profile_dir),
        }
    }

    pub fn accept_failure_pause(&self) -> Duration {
        Duration::from_millis(self.accept_failure_pause_ms)
    }

    pub fn teardown_linger(&self) -> Duration {
        Duration::from_millis(self.teardown_linger_ms)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = SecureSocketConfig::from_toml_str("").expect("解析空配置失败");
        assert_eq!(config, SecureSocketConfig::default());
        assert_eq!(config.max_retry, 100_000);
    }

    #[test]
    fn toml_overrides_fields() {
        let config = SecureSocketConfig::from_toml_str(
            r#"
            max_retry = 7
            profile_dir = "/profile"
            accept_failure_pause_ms = 0

            [certificate]
            certificate = "/profile/SSL/server.pem"
            private_key = "/profile/SSL/server.pem"
            "#,
        )
        .expect("解析配置失败");
        assert_eq!(config.max_retry, 7);
        assert_eq!(config.accept_failure_pause(), Duration::ZERO);
        assert_eq!(
            config.trust_store().path(),
            Path::new("/profile/SSL/Fingerprints/TrustedServers.txt")
        );
        assert_eq!(
            config.certificate,
            Some(CertificatePaths::combined("/profile/SSL/server.pem"))
        );
    }

    #[test]
    fn oversized_pauses_saturate_instead_of_wrapping() {
        let config = SecureSocketConfig::default().with_pauses(Duration::MAX, Duration::MAX);
        assert_eq!(config.accept_failure_pause_ms, u64::MAX);
        assert_eq!(config.teardown_linger_ms, u64::MAX);
        assert_eq!(config.teardown_linger(), Duration::from_millis(u64::MAX));

        let config = SecureSocketConfig::default()
            .with_pauses(Duration::from_millis(250), Duration::from_micros(1_999));
        assert_eq!(config.accept_failure_pause(), Duration::from_millis(250));
        assert_eq!(config.teardown_linger(), Duration::from_millis(1));
    }

    #[test]
    fn explicit_trust_store_wins() {
        let config = SecureSocketConfig::default()
            .with_profile_dir("/profile")
            .with_trust_store("/etc/pins.txt");
        assert_eq!(config.trust_store().path(), Path::new("/etc/pins.txt"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SecureSocketConfig::from_toml_str("max_retry = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = SecureSocketConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
