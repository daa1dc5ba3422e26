use std::{
    collections::VecDeque,
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    crypto::{CryptoProvider, ring},
};
use rustls_pki_types::ServerName;
use tracing::trace;

use super::{ChannelMode, EngineCode, EngineSession, TlsEngine, Transport, verifier};
use crate::{
    certificate::{CertificatePaths, load_server_identity},
    config::SecureSocketConfig,
    error::CertificateError,
    socket::SocketDescriptor,
};

/// 基于 `rustls` 的 TLS 上下文。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `rustls` 是 sans-IO 引擎：它不拥有套接字，只在 `read_tls`/`write_tls` 时借用字节流，
///   恰好契合“套接字归基础流套接字所有、引擎只借用”的所有权模型；
/// - 上下文按模式一次性构造：客户端携带指纹固定校验器，服务端携带已装载的证书与私钥。
///
/// ## 契约（What）
/// - [`RustlsEngine::new`]：按通道模式与配置创建上下文，服务端模式下证书装载失败即返回
///   [`CertificateError`]；
/// - 协议版本使用 `rustls` 的安全默认值（TLS1.2 / TLS1.3），从不协商 SSLv3。
#[derive(Clone)]
pub struct RustlsEngine {
    context: EngineContext,
}

#[derive(Clone)]
enum EngineContext {
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

impl RustlsEngine {
    pub fn new(mode: ChannelMode, config: &SecureSocketConfig) -> Result<Self, CertificateError> {
        match mode {
            ChannelMode::Client => Self::client(&config.server_name),
            ChannelMode::Server => {
                let paths = config
                    .certificate
                    .as_ref()
                    .ok_or(CertificateError::NotSpecified)?;
                Self::server(paths)
            }
        }
    }

    /// 客户端上下文：证书链交给指纹固定判定，握手签名照常校验。
    pub fn client(server_name: &str) -> Result<Self, CertificateError> {
        let provider = Arc::new(ring::default_provider());
        let server_name = ServerName::try_from(server_name.to_owned()).map_err(|err| {
            CertificateError::Engine(rustls::Error::General(format!(
                "invalid server name {server_name:?}: {err}"
            )))
        })?;
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier::PinningServerVerifier::new(
                provider,
            )))
            .with_no_client_auth();
        Ok(Self::from_client_config(Arc::new(config), server_name))
    }

    /// 服务端上下文：装载证书与私钥并校验两者匹配。
    pub fn server(paths: &CertificatePaths) -> Result<Self, CertificateError> {
        let identity = load_server_identity(paths)?;
        let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(identity.chain, identity.key)
            .map_err(|err| match err {
                rustls::Error::InconsistentKeys(_) => CertificateError::KeyMismatch {
                    reason: err.to_string(),
                },
                other => CertificateError::KeyRejected {
                    path: paths.private_key.clone(),
                    reason: other.to_string(),
                },
            })?;
        Ok(Self::from_server_config(Arc::new(config)))
    }

    pub fn from_client_config(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            context: EngineContext::Client {
                config,
                server_name,
            },
        }
    }

    pub fn from_server_config(config: Arc<ServerConfig>) -> Self {
        Self {
            context: EngineContext::Server { config },
        }
    }
}

impl fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl TlsEngine for RustlsEngine {
    type Session = RustlsSession;

    fn mode(&self) -> ChannelMode {
        match self.context {
            EngineContext::Client { .. } => ChannelMode::Client,
            EngineContext::Server { .. } => ChannelMode::Server,
        }
    }

    fn new_session(&self) -> Result<RustlsSession, String> {
        let connection = match &self.context {
            EngineContext::Client {
                config,
                server_name,
            } => ClientConnection::new(config.clone(), server_name.clone()).map(Connection::from),
            EngineContext::Server { config } => {
                ServerConnection::new(config.clone()).map(Connection::from)
            }
        };
        connection
            .map(RustlsSession::new)
            .map_err(|err| err.to_string())
    }
}

/// `rustls` 会话。
///
/// 每个原语都推进到套接字返回 `WouldBlock` 为止，再把当时的状态翻译为 [`EngineCode`]，
/// 与“非阻塞调用 + 结构化错误码”的引擎契约对齐。
pub struct RustlsSession {
    connection: Connection,
    descriptor: Option<SocketDescriptor>,
    last: EngineCode,
    errors: VecDeque<String>,
    transport_error: Option<io::Error>,
}

enum Pull {
    Progress,
    WouldBlock,
    Eof,
    Rejected,
    Failed(io::Error),
}

impl RustlsSession {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            descriptor: None,
            last: EngineCode::None,
            errors: VecDeque::new(),
            transport_error: None,
        }
    }

    fn settle(&mut self, code: EngineCode, ret: isize) -> isize {
        self.last = code;
        ret
    }

    fn transport_failure(&mut self, err: io::Error) -> isize {
        trace!(descriptor = ?self.descriptor, error = %err, "tls transport failure");
        self.transport_error = Some(err);
        self.settle(EngineCode::Syscall, -1)
    }

    /// 写出引擎内待发送的记录；返回 `Ok(false)` 表示套接字暂不可写。
    fn push_records(&mut self, io: &mut dyn Transport) -> io::Result<bool> {
        while self.connection.wants_write() {
            match self.connection.write_tls(&mut Wire(&mut *io)) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    fn pull_records(&mut self, io: &mut dyn Transport) -> Pull {
        match self.connection.read_tls(&mut Wire(&mut *io)) {
            Ok(0) => Pull::Eof,
            Ok(_) => match self.connection.process_new_packets() {
                Ok(_) => Pull::Progress,
                Err(err) => {
                    self.errors.push_back(err.to_string());
                    // 尽力把告警记录送达对端，失败无关紧要。
                    let _ = self.push_records(io);
                    Pull::Rejected
                }
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Pull::WouldBlock,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Pull::Progress,
            Err(err) => Pull::Failed(err),
        }
    }

    fn handshake(&mut self, io: &mut dyn Transport) -> isize {
        loop {
            match self.push_records(io) {
                Ok(true) => {}
                Ok(false) => return self.settle(EngineCode::WantWrite, -1),
                Err(err) => return self.transport_failure(err),
            }
            if !self.connection.is_handshaking() {
                return self.settle(EngineCode::None, 1);
            }
            match self.pull_records(io) {
                Pull::Progress => {}
                Pull::WouldBlock => return self.settle(EngineCode::WantRead, -1),
                Pull::Eof => return self.settle(EngineCode::Syscall, 0),
                Pull::Rejected => return self.settle(EngineCode::Ssl, -1),
                Pull::Failed(err) => return self.transport_failure(err),
            }
        }
    }
}

impl EngineSession for RustlsSession {
    fn bind(&mut self, descriptor: SocketDescriptor) {
        self.descriptor = Some(descriptor);
    }

    fn connect(&mut self, io: &mut dyn Transport) -> isize {
        self.handshake(io)
    }

    fn accept(&mut self, io: &mut dyn Transport) -> isize {
        self.handshake(io)
    }

    fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> isize {
        if buf.is_empty() {
            return self.settle(EngineCode::None, 0);
        }
        loop {
            if let Err(err) = self.push_records(io) {
                return self.transport_failure(err);
            }
            match self.connection.reader().read(buf) {
                Ok(0) => return self.settle(EngineCode::ZeroReturn, 0),
                Ok(size) => return self.settle(EngineCode::None, size as isize),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                // 对端未发送 close_notify 就断开。
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return self.settle(EngineCode::Syscall, 0);
                }
                Err(err) => return self.transport_failure(err),
            }
            match self.pull_records(io) {
                Pull::Progress => {}
                Pull::WouldBlock => return self.settle(EngineCode::WantRead, -1),
                Pull::Eof => return self.settle(EngineCode::Syscall, 0),
                Pull::Rejected => return self.settle(EngineCode::Ssl, -1),
                Pull::Failed(err) => return self.transport_failure(err),
            }
        }
    }

    fn write(&mut self, io: &mut dyn Transport, buf: &[u8]) -> isize {
        if buf.is_empty() {
            return self.settle(EngineCode::None, 0);
        }
        let accepted = match self.connection.writer().write(buf) {
            Ok(size) => size,
            Err(err) => return self.transport_failure(err),
        };
        if let Err(err) = self.push_records(io) {
            return self.transport_failure(err);
        }
        if accepted == 0 {
            return self.settle(EngineCode::WantWrite, -1);
        }
        self.settle(EngineCode::None, accepted as isize)
    }

    fn flush(&mut self, io: &mut dyn Transport) -> isize {
        match self.push_records(io) {
            Ok(true) => self.settle(EngineCode::None, 1),
            Ok(false) => self.settle(EngineCode::WantWrite, -1),
            Err(err) => self.transport_failure(err),
        }
    }

    fn shutdown(&mut self, io: &mut dyn Transport) -> isize {
        self.connection.send_close_notify();
        self.flush(io)
    }

    fn error_code(&self, ret: isize) -> EngineCode {
        if ret > 0 { EngineCode::None } else { self.last }
    }

    fn has_pending_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn drain_errors(&mut self) -> Vec<String> {
        self.errors.drain(..).collect()
    }

    fn take_transport_error(&mut self) -> Option<io::Error> {
        self.transport_error.take()
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.connection
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|cert| cert.as_ref().to_vec())
    }

    fn cipher_description(&self) -> Option<String> {
        let suite = self.connection.negotiated_cipher_suite()?;
        Some(match self.connection.protocol_version() {
            Some(version) => format!("{:?} {:?}", version, suite.suite()),
            None => format!("{:?}", suite.suite()),
        })
    }
}

impl fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsSession")
            .field("descriptor", &self.descriptor)
            .field("last", &self.last)
            .field("handshaking", &self.connection.is_handshaking())
            .finish_non_exhaustive()
    }
}

/// 把 `dyn Transport` 适配为 `rustls` 需要的 `Read`/`Write` 对象。
struct Wire<'a>(&'a mut dyn Transport);

impl Read for Wire<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for Wire<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
