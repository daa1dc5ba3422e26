//! 安全套接字错误分类模块。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把“证书配置错误 / 通道致命错误 / 握手与信任错误 / 配置读取错误”四类失败显式区分，
//!   让会话层可以按类别决定用户可见行为（提示重试、弹出指纹固定对话框等）；
//! - 为每个错误提供稳定错误码（`code()`），统一使用 `spark.transport.secure.*` 前缀，
//!   便于日志与指标关联。
//!
//! ## 契约（What）
//! - “would block” 一类瞬时错误永远不会以错误类型出现，它们在分类器内部被重试吸收；
//! - 只有通道级终态（Fatal、信任拒绝）会向上传播。

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// 证书 / 私钥装载失败，属于启动期配置错误。
#[derive(Debug, Error)]
pub enum CertificateError {
    /// 服务端模式未配置证书路径。
    #[error("ssl certificate is not specified")]
    NotSpecified,
    /// 证书或私钥文件不存在。
    #[error("ssl certificate doesn't exist: {}", path.display())]
    Missing { path: PathBuf },
    /// 文件存在但无法读取。
    #[error("ssl certificate file is unreadable: {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// PEM 中没有可用的证书，或证书被引擎拒绝。
    #[error("could not use ssl certificate {}: {reason}", path.display())]
    CertificateRejected { path: PathBuf, reason: String },
    /// PEM 中没有可用的私钥，或私钥被引擎拒绝。
    #[error("could not use ssl private key {}: {reason}", path.display())]
    KeyRejected { path: PathBuf, reason: String },
    /// 私钥与证书公钥不匹配。
    #[error("could not verify ssl private key: {reason}")]
    KeyMismatch { reason: String },
    /// 引擎上下文构造失败（协议版本、密码套件等）。
    #[error("could not create ssl context: {0}")]
    Engine(#[from] rustls::Error),
}

impl CertificateError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            CertificateError::NotSpecified => "spark.transport.secure.certificate_not_specified",
            CertificateError::Missing { .. } => "spark.transport.secure.certificate_missing",
            CertificateError::Unreadable { .. } => "spark.transport.secure.certificate_unreadable",
            CertificateError::CertificateRejected { .. } => {
                "spark.transport.secure.certificate_rejected"
            }
            CertificateError::KeyRejected { .. } => "spark.transport.secure.key_rejected",
            CertificateError::KeyMismatch { .. } => "spark.transport.secure.key_mismatch",
            CertificateError::Engine(_) => "spark.transport.secure.context_failed",
        }
    }
}

/// 通道读写与关闭阶段的错误。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 通道已被标记为致命，不可再用于读写。
    #[error("secure channel is unusable after a fatal error")]
    Fatal,
    /// 关闭底层套接字时发生的 IO 错误。
    #[error("secure channel close failed: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::Fatal => "spark.transport.secure.fatal",
            ChannelError::Io(_) => "spark.transport.secure.close_failed",
        }
    }
}

/// 握手失败原因。
///
/// 协议失败与信任失败刻意分开：前者意味着链路不可用，后者意味着链路在密码学上可用，
/// 但对端证书未被固定，会话层可据此提示用户固定指纹。
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// 引擎报告致命结果（对端关闭、传输失败、通用失败、重试超限等）。
    #[error("tls handshake failed")]
    Protocol,
    /// 对端证书指纹不在信任库中。
    #[error("server fingerprint {fingerprint} is not trusted")]
    Untrusted { fingerprint: Fingerprint },
    /// 握手完成但对端没有出示证书。
    #[error("server has no ssl certificate")]
    MissingPeerCertificate,
    /// 无法为通道分配会话。
    #[error("could not create ssl session: {0}")]
    Session(String),
    /// 通道在握手前或握手期间已被关闭。
    #[error("secure channel already closed")]
    Closed,
}

impl HandshakeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::Protocol => "spark.transport.secure.handshake_failed",
            HandshakeError::Untrusted { .. } => "spark.transport.secure.untrusted_fingerprint",
            HandshakeError::MissingPeerCertificate => "spark.transport.secure.no_peer_certificate",
            HandshakeError::Session(_) => "spark.transport.secure.session_failed",
            HandshakeError::Closed => "spark.transport.secure.closed",
        }
    }

    /// 是否属于信任类失败（可通过固定指纹解决）。
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            HandshakeError::Untrusted { .. } | HandshakeError::MissingPeerCertificate
        )
    }
}

/// 配置文件读取与解析错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "spark.transport.secure.config_unreadable",
            ConfigError::Parse(_) => "spark.transport.secure.config_invalid",
        }
    }
}
