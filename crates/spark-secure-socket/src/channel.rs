use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    classifier::{FatalLatch, Outcome, ResultClassifier},
    config::SecureSocketConfig,
    engine::{ChannelMode, EngineSession, RustlsEngine, TlsEngine},
    error::{CertificateError, ChannelError},
    events::{DISCONNECT_SEQUENCE, EventSink},
    handshake::HandshakeState,
    socket::{SocketDescriptor, StreamSocket},
    trust_store::TrustStore,
};

/// `read_buf` 单次最多搬运的明文字节数。
const READ_CHUNK: usize = 16 * 1024;

/// 一次加密读写的非错误结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    /// 实际搬运的明文字节数。
    Transferred(usize),
    /// 引擎需要等待下一次就绪事件，本次未搬运任何字节。
    ///
    /// 握手进行中（会话已存在但尚未就绪）时也返回该值，且不进入引擎。
    Retry,
    /// 尚未创建会话，调用方应回退到明文套接字处理。
    NotSecure,
}

/// 安全通道：把一个明文流套接字包装为加密、已认证的通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在事件反应器内部提供与明文套接字相同形状的读写接口，但所有 IO 都经过 TLS 引擎，
///   并且永不阻塞调用线程；
/// - 统一管理通道生命周期：上下文与会话的所有权、只增不减的致命标记、一次性的断连通知。
///
/// ## 逻辑（How）
/// - `parking_lot::Mutex` 包裹套接字、会话与重试计数，作为“每通道互斥锁”：
///   握手服务与读写服务都必须持锁才能触碰会话；
/// - 致命标记（[`FatalLatch`]）与 `secure_ready` 是原子量，`close` 可以不持锁先行翻转标记，
///   正在排队的握手或读写在拿到锁后立即观察到它并放弃；
/// - 所有引擎调用都经过 [`ResultClassifier`]，致命结果在这里转换为断连事件，且只发一次。
///
/// ## 契约（What）
/// - 致命通道上的任何读写都直接返回 [`ChannelError::Fatal`]，不会再进入引擎；
/// - 尚无会话时读写返回 [`IoStatus::NotSecure`]，握手进行中返回 [`IoStatus::Retry`]，
///   两者都不进入引擎，握手记录不会被当作明文交出，指纹校验前也不会有应用数据流动；
/// - 析构顺序固定：发送关闭通知 → 短暂停顿让通知落地 → 释放会话 → 释放上下文；
///   握手从未开始（没有会话）时跳过前两步。
///
/// ## 风险与权衡（Trade-offs）
/// - 析构中的停顿发生在调用线程上，默认一秒；测试与批量拆除场景可通过配置置零。
pub struct SecureChannel<S: StreamSocket, E: TlsEngine = RustlsEngine> {
    mode: ChannelMode,
    descriptor: SocketDescriptor,
    pub(crate) state: Mutex<ChannelState<S, E>>,
    pub(crate) fatal: FatalLatch,
    pub(crate) secure_ready: AtomicBool,
    pub(crate) trust_store: TrustStore,
    pub(crate) accept_failure_pause: Duration,
    teardown_linger: Duration,
    events: Arc<dyn EventSink>,
}

pub(crate) struct ChannelState<S: StreamSocket, E: TlsEngine> {
    pub(crate) socket: S,
    pub(crate) engine: Option<E>,
    pub(crate) session: Option<E::Session>,
    pub(crate) classifier: ResultClassifier,
    pub(crate) handshake: HandshakeState,
    pub(crate) cipher: Option<String>,
    pub(crate) peer_subject: Option<String>,
    shutdown_sent: bool,
    socket_closed: bool,
}

impl<S: StreamSocket> SecureChannel<S, RustlsEngine> {
    /// 按模式创建 `rustls` 上下文并构造通道；服务端模式下证书装载失败即返回错误。
    pub fn initialize(
        socket: S,
        mode: ChannelMode,
        config: &SecureSocketConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, CertificateError> {
        let engine = RustlsEngine::new(mode, config)?;
        Ok(Self::new(socket, engine, config, events))
    }
}

impl<S: StreamSocket, E: TlsEngine> SecureChannel<S, E> {
    pub fn new(
        socket: S,
        engine: E,
        config: &SecureSocketConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let mode = engine.mode();
        let descriptor = socket.descriptor();
        debug!(channel = %descriptor, %mode, "secure channel initialized");
        Self {
            mode,
            descriptor,
            state: Mutex::new(ChannelState {
                socket,
                engine: Some(engine),
                session: None,
                classifier: ResultClassifier::new(config.max_retry),
                handshake: HandshakeState::Idle,
                cipher: None,
                peer_subject: None,
                shutdown_sent: false,
                socket_closed: false,
            }),
            fatal: FatalLatch::new(),
            secure_ready: AtomicBool::new(false),
            trust_store: config.trust_store(),
            accept_failure_pause: config.accept_failure_pause(),
            teardown_linger: config.teardown_linger(),
            events,
        }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn descriptor(&self) -> SocketDescriptor {
        self.descriptor
    }

    pub fn is_secure_ready(&self) -> bool {
        self.secure_ready.load(Ordering::Acquire)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_tripped()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.state.lock().handshake
    }

    /// 当前连续重试次数。
    pub fn retry_count(&self) -> u32 {
        self.state.lock().classifier.retry_count()
    }

    pub fn max_retry(&self) -> u32 {
        self.state.lock().classifier.max_retry()
    }

    /// 握手完成后协商出的密码套件描述。
    pub fn negotiated_cipher(&self) -> Option<String> {
        self.state.lock().cipher.clone()
    }

    /// 客户端握手完成后记录的服务端证书主题。
    pub fn peer_certificate_subject(&self) -> Option<String> {
        self.state.lock().peer_subject.clone()
    }

    /// 读取解密后的明文。
    ///
    /// # 契约说明
    /// - 返回 `Transferred(n)`：读到 `n` 字节；
    /// - 返回 `Retry`：暂无数据或握手仍在进行，等待下一次就绪事件；
    /// - 返回 `NotSecure`：尚未创建会话；
    /// - 返回 `Err(Fatal)`：通道已不可用，断连事件已（或早已）发出。
    pub fn read(&self, buf: &mut [u8]) -> Result<IoStatus, ChannelError> {
        self.transfer(|session, socket| {
            trace!("reading secure socket");
            session.read(socket, buf)
        })
    }

    /// 写入明文并由引擎加密发送。
    pub fn write(&self, buf: &[u8]) -> Result<IoStatus, ChannelError> {
        self.transfer(|session, socket| {
            trace!("writing secure socket");
            session.write(socket, buf)
        })
    }

    /// 推送引擎内已加密但尚未写出的记录。
    pub fn flush(&self) -> Result<IoStatus, ChannelError> {
        self.transfer(|session, socket| session.flush(socket))
            .map(|status| match status {
                IoStatus::Transferred(_) => IoStatus::Transferred(0),
                other => other,
            })
    }

    /// 读取明文并追加到 `dst` 末尾。
    pub fn read_buf(&self, dst: &mut BytesMut) -> Result<IoStatus, ChannelError> {
        let mut chunk = [0u8; READ_CHUNK];
        let status = self.read(&mut chunk)?;
        if let IoStatus::Transferred(size) = status {
            dst.put_slice(&chunk[..size]);
        }
        Ok(status)
    }

    fn transfer<F>(&self, op: F) -> Result<IoStatus, ChannelError>
    where
        F: FnOnce(&mut E::Session, &mut S) -> isize,
    {
        if self.fatal.is_tripped() {
            return Err(ChannelError::Fatal);
        }
        let mut guard = self.state.lock();
        // `close` 可能在等待锁期间翻转了标记。
        if self.fatal.is_tripped() {
            return Err(ChannelError::Fatal);
        }
        let state = &mut *guard;
        match state.handshake {
            HandshakeState::Idle => return Ok(IoStatus::NotSecure),
            HandshakeState::Handshaking => return Ok(IoStatus::Retry),
            HandshakeState::Failed => return Err(ChannelError::Fatal),
            HandshakeState::Ready => {}
        }
        let Some(session) = state.session.as_mut() else {
            return Ok(IoStatus::NotSecure);
        };
        let ret = op(&mut *session, &mut state.socket);
        let outcome = state.classifier.classify(ret, session, &state.socket);
        drop(guard);
        match self.settle(outcome) {
            Outcome::Complete => Ok(IoStatus::Transferred(ret.max(0) as usize)),
            Outcome::Retry(_) => Ok(IoStatus::Retry),
            Outcome::Fatal => Err(ChannelError::Fatal),
        }
    }

    /// 显式关闭：先标记致命，再发送关闭通知，最后关闭底层套接字。
    ///
    /// 可以重复调用；关闭通知与套接字关闭各只执行一次。
    pub fn close(&self) -> Result<(), ChannelError> {
        self.fatal.trip();
        self.secure_ready.store(false, Ordering::Release);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.classifier.reset();
        state.handshake = HandshakeState::Failed;
        if let Some(session) = state.session.as_mut()
            && !state.shutdown_sent
        {
            state.shutdown_sent = true;
            debug!(channel = %self.descriptor, "sending tls close notify");
            session.shutdown(&mut state.socket);
        }
        if !state.socket_closed {
            state.socket_closed = true;
            state.socket.close()?;
        }
        Ok(())
    }

    /// 把分类结果落到通道状态上：致命时触发一次性断连。
    pub(crate) fn settle(&self, outcome: Outcome) -> Outcome {
        if outcome.is_fatal() {
            self.disconnect();
        }
        outcome
    }

    /// 标记通道不可用，并在首次转换时依次发出断连事件。
    pub(crate) fn disconnect(&self) {
        self.secure_ready.store(false, Ordering::Release);
        if self.fatal.trip() {
            debug!(channel = %self.descriptor, "secure channel disconnected");
            for event in DISCONNECT_SEQUENCE {
                self.events.send(event);
            }
        }
    }
}

impl<S: StreamSocket, E: TlsEngine> Drop for SecureChannel<S, E> {
    fn drop(&mut self) {
        self.fatal.trip();
        let linger = self.teardown_linger;
        let descriptor = self.descriptor;
        let state = self.state.get_mut();
        if let Some(mut session) = state.session.take() {
            if !state.shutdown_sent {
                state.shutdown_sent = true;
                let ret = session.shutdown(&mut state.socket);
                if ret <= 0 {
                    warn!(channel = %descriptor, "tls close notify could not be flushed");
                }
                if !linger.is_zero() {
                    thread::sleep(linger);
                }
            }
            drop(session);
        }
        state.engine.take();
        trace!(channel = %descriptor, "secure channel released");
    }
}

impl<S: StreamSocket, E: TlsEngine> fmt::Debug for SecureChannel<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("mode", &self.mode)
            .field("descriptor", &self.descriptor)
            .field("secure_ready", &self.is_secure_ready())
            .field("fatal", &self.is_fatal())
            .finish_non_exhaustive()
    }
}
