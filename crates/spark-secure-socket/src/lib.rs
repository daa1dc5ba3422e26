#![doc = r#"
# spark-secure-socket

## 设计动机（Why）
- **反应器友好**：在单线程事件反应器内部把明文流套接字升级为 TLS 通道，所有引擎调用都非阻塞，
  “需要等待”被显式建模为重试而不是阻塞；
- **信任模型简单**：客户端不依赖 CA 链，而是以服务端证书的 SHA-1 指纹与本地信任库逐行比对；
- **故障可收敛**：任意致命结果都会让通道进入不可逆的致命态，并恰好发出一次断连事件序列。

## 核心契约（What）
- [`SecureChannel`]：对外暴露握手服务、加密读写、显式关闭与状态查询；
- [`ResultClassifier`]：把引擎原始返回值归类为完成 / 重试 / 致命，并维护连续重试计数与上限；
- [`TrustStore`] 与 [`Fingerprint`]：信任库读取与指纹规范化（`AA:BB:...`，共 59 个字符）；
- [`reactor`]：把握手包装为反应器作业，成功后切换到调用方提供的下一阶段作业。

## 实现策略（How）
- 以 `rustls` 的无 IO 连接（sans-IO）作为默认引擎，通过 [`TlsEngine`] / [`EngineSession`]
  两个 trait 隔离，测试可替换为脚本化引擎；
- 客户端证书校验器接受任意证书链，但仍验证握手签名，身份判定交给指纹比对；
- 通道内部以 `parking_lot::Mutex` 串行化会话访问，致命标记与就绪标记为原子量。

## 风险与考量（Trade-offs）
- 信任库每次校验都重新读取文件，外部工具可随时编辑而无需通知进程；
- 受理失败后的停顿与析构时的排空停顿都会占用调用线程，默认各一秒，可通过配置调整。
"#]

pub mod certificate;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod handshake;
pub mod logging;
pub mod reactor;
pub mod socket;
pub mod trust_store;

pub use certificate::{CertificatePaths, ServerIdentity, load_server_identity};
pub use channel::{IoStatus, SecureChannel};
pub use classifier::{FatalLatch, Outcome, ResultClassifier};
pub use config::{DEFAULT_MAX_RETRY, SecureSocketConfig};
pub use engine::{
    ChannelMode, EngineCode, EngineSession, RustlsEngine, RustlsSession, TlsEngine, Transport,
};
pub use error::{CertificateError, ChannelError, ConfigError, HandshakeError};
pub use events::{DiscardEvents, EventSink, RecordingSink, SocketEvent};
pub use fingerprint::{Fingerprint, format_fingerprint};
pub use handshake::{HandshakeProgress, HandshakeState, verify_server_fingerprint};
pub use logging::{LoggingError, install_default_subscriber};
pub use reactor::{
    HandshakeJob, Interest, JobOutcome, MultiplexerJob, NextStage, Reactor, Readiness,
};
pub use socket::{SocketDescriptor, StreamSocket, prepare_nonblocking};
pub use trust_store::TrustStore;
