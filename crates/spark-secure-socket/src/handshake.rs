//! 握手状态机。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手由反应器驱动：每次套接字就绪时调用一次 `service_connect` / `service_accept`，
//!   引擎推进到不能再推进为止，然后把“继续等待 / 已建立 / 失败”交还给调用方；
//! - 客户端在密码学握手完成之后还要额外校验服务端证书指纹，未固定的服务端同样视为断连。
//!
//! ## 逻辑（How）
//! 1. 致命通道直接返回 [`HandshakeError::Closed`]，不触碰引擎；
//! 2. 首次服务时从上下文派生会话并绑定描述符；
//! 3. 调用握手原语，结果交给分类器；
//! 4. `Retry` → [`HandshakeProgress::Pending`]；`Fatal` → 断连并返回错误；
//! 5. `Complete` → 标记 `secure_ready`，客户端校验指纹、记录证书主题，两端都记录协商出的套件。
//!
//! ## 契约（What）
//! - 服务端从不校验客户端证书指纹；
//! - 受理失败时在释放锁之后停顿一段时间（默认一秒），抑制失败风暴；
//! - 握手期间致命失败与信任失败都会让通道进入 [`HandshakeState::Failed`]，并恰好发出一次断连事件。

use std::{sync::atomic::Ordering, thread};

use tracing::{debug, error, info, trace, warn};

use crate::{
    channel::SecureChannel,
    classifier::Outcome,
    engine::{ChannelMode, EngineSession, TlsEngine},
    error::HandshakeError,
    fingerprint::Fingerprint,
    socket::StreamSocket,
    trust_store::TrustStore,
};

/// 通道握手阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// 尚未创建会话。
    Idle,
    /// 会话已创建，握手进行中。
    Handshaking,
    /// 握手完成（客户端还通过了指纹校验）。
    Ready,
    /// 握手失败或通道已被关闭。
    Failed,
}

/// 单次握手服务的非错误结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// 需要等待下一次就绪事件；`attempt` 为当前连续重试次数。
    Pending { attempt: u32 },
    /// 握手已建立。
    Established,
}

impl<S: StreamSocket, E: TlsEngine> SecureChannel<S, E> {
    /// 推进一次客户端握手。
    pub fn service_connect(&self) -> Result<HandshakeProgress, HandshakeError> {
        self.service_handshake(ChannelMode::Client)
    }

    /// 推进一次服务端握手。
    pub fn service_accept(&self) -> Result<HandshakeProgress, HandshakeError> {
        self.service_handshake(ChannelMode::Server)
    }

    fn service_handshake(&self, side: ChannelMode) -> Result<HandshakeProgress, HandshakeError> {
        if self.fatal.is_tripped() {
            return Err(HandshakeError::Closed);
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if self.fatal.is_tripped() {
            state.handshake = HandshakeState::Failed;
            return Err(HandshakeError::Closed);
        }
        match state.handshake {
            HandshakeState::Ready => return Ok(HandshakeProgress::Established),
            HandshakeState::Failed => return Err(HandshakeError::Closed),
            HandshakeState::Idle | HandshakeState::Handshaking => {}
        }
        if side != self.mode() {
            error!(
                channel = %self.descriptor(),
                %side,
                mode = %self.mode(),
                "handshake side does not match channel mode"
            );
            state.handshake = HandshakeState::Failed;
            drop(guard);
            self.disconnect();
            return Err(HandshakeError::Session(format!(
                "{side} handshake requested on a {} channel",
                self.mode()
            )));
        }

        if state.session.is_none() {
            let created = match state.engine.as_ref() {
                Some(engine) => engine.new_session(),
                None => Err("tls context already released".to_owned()),
            };
            match created {
                Ok(session) => {
                    debug!(channel = %self.descriptor(), "ssl session created");
                    state.session = Some(session);
                }
                Err(reason) => {
                    error!(channel = %self.descriptor(), %reason, "could not create ssl session");
                    state.handshake = HandshakeState::Failed;
                    drop(guard);
                    self.disconnect();
                    return Err(HandshakeError::Session(reason));
                }
            }
        }
        state.handshake = HandshakeState::Handshaking;

        let descriptor = state.socket.descriptor();
        let Some(session) = state.session.as_mut() else {
            return Err(HandshakeError::Session("ssl session missing".to_owned()));
        };
        session.bind(descriptor);
        let ret = match side {
            ChannelMode::Client => {
                trace!(channel = %descriptor, "connecting secure socket");
                session.connect(&mut state.socket)
            }
            ChannelMode::Server => {
                trace!(channel = %descriptor, "accepting secure socket");
                session.accept(&mut state.socket)
            }
        };

        match state.classifier.classify(ret, &mut *session, &state.socket) {
            Outcome::Fatal => {
                state.handshake = HandshakeState::Failed;
                drop(guard);
                self.disconnect();
                match side {
                    ChannelMode::Client => {
                        error!(channel = %descriptor, "failed to connect secure socket");
                    }
                    ChannelMode::Server => {
                        error!(channel = %descriptor, "failed to accept secure socket");
                        info!(channel = %descriptor, "client connection may not be secure");
                        if !self.accept_failure_pause.is_zero() {
                            thread::sleep(self.accept_failure_pause);
                        }
                    }
                }
                return Err(HandshakeError::Protocol);
            }
            Outcome::Retry(attempt) => {
                self.secure_ready.store(false, Ordering::Release);
                return Ok(HandshakeProgress::Pending { attempt });
            }
            Outcome::Complete => {}
        }

        self.secure_ready.store(true, Ordering::Release);
        if side == ChannelMode::Client {
            let peer: &E::Session = &*session;
            let verified = verify_server_fingerprint(peer, &self.trust_store)
                .and_then(|fingerprint| describe_peer(peer).map(|subject| (fingerprint, subject)));
            match verified {
                Ok((fingerprint, subject)) => {
                    info!(channel = %descriptor, %fingerprint, "connected to secure socket");
                    info!(channel = %descriptor, %subject, "server ssl certificate info");
                    state.peer_subject = Some(subject);
                }
                Err(err) => {
                    state.handshake = HandshakeState::Failed;
                    drop(guard);
                    self.disconnect();
                    return Err(err);
                }
            }
        } else {
            info!(channel = %descriptor, "accepted secure socket");
        }

        let cipher = session.cipher_description();
        if let Some(cipher) = &cipher {
            info!(channel = %descriptor, %cipher, "negotiated cipher");
        }
        state.cipher = cipher;
        state.handshake = HandshakeState::Ready;
        Ok(HandshakeProgress::Established)
    }
}

/// 计算对端证书指纹并与信任库比对。
///
/// 计算失败（对端没有证书）与比对失败都会记录错误日志。
pub fn verify_server_fingerprint(
    session: &dyn EngineSession,
    trust_store: &TrustStore,
) -> Result<Fingerprint, HandshakeError> {
    let Some(der) = session.peer_certificate() else {
        error!("failed to calculate fingerprint, server has no ssl certificate");
        return Err(HandshakeError::MissingPeerCertificate);
    };
    let fingerprint = Fingerprint::of_certificate(&der);
    info!(%fingerprint, "server fingerprint: {fingerprint}");
    if trust_store.contains(&fingerprint) {
        Ok(fingerprint)
    } else {
        error!(
            path = %trust_store.path().display(),
            "failed to verify server certificate fingerprint"
        );
        Err(HandshakeError::Untrusted { fingerprint })
    }
}

fn describe_peer(session: &dyn EngineSession) -> Result<String, HandshakeError> {
    match session.peer_certificate() {
        Some(der) => Ok(certificate_subject(&der)),
        None => {
            error!("server has no ssl certificate");
            Err(HandshakeError::MissingPeerCertificate)
        }
    }
}

/// 解析 DER 证书的主题名；解析失败时返回占位文本，不影响握手结果。
pub fn certificate_subject(der: &[u8]) -> String {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, certificate)) => certificate.subject().to_string(),
        Err(err) => {
            warn!(error = %err, "failed to parse server certificate subject");
            "<unparsable subject>".to_owned()
        }
    }
}
