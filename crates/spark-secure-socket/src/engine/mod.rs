//! TLS 引擎接缝。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手、记录层加解密与证书链校验都交给外部 TLS 引擎；适配层只需要“会话状态 + 读写原语 +
//!   结构化错误码”三样东西；
//! - 通过 trait 隔离引擎，分类器与状态机即可在测试中用脚本化引擎重放任意错误码序列。
//!
//! ## 契约（What）
//! - 所有原语都是非阻塞的：每次调用推进到不能再推进为止，返回一个原始整数；
//! - 原始返回值 `> 0` 表示成功（读写为字节数）；`<= 0` 时通过 [`EngineSession::error_code`]
//!   查询本次调用的 [`EngineCode`]；
//! - 引擎内部的错误队列通过 [`EngineSession::has_pending_errors`] /
//!   [`EngineSession::drain_errors`] 暴露，分类器在致命时把它们全部写入日志。

use std::{fmt, io};

use crate::socket::SocketDescriptor;

pub mod rustls_engine;
pub mod verifier;

pub use self::rustls_engine::{RustlsEngine, RustlsSession};

/// 通道模式：客户端主动发起，或服务端受理。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Client,
    Server,
}

impl ChannelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMode::Client => "client",
            ChannelMode::Server => "server",
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 引擎针对单次调用给出的结构化结果码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineCode {
    /// 操作完成。
    None,
    /// 对端发送了 close_notify，会话被干净地关闭。
    ZeroReturn,
    WantRead,
    WantWrite,
    WantConnect,
    WantAccept,
    /// 底层传输失败（EOF 或套接字错误）。
    Syscall,
    /// 引擎内部的协议或密码学失败。
    Ssl,
    /// 无法识别的结果码。
    Other(i32),
}

impl EngineCode {
    /// 是否属于“稍后重试”一族。
    pub fn is_want(self) -> bool {
        matches!(
            self,
            EngineCode::WantRead
                | EngineCode::WantWrite
                | EngineCode::WantConnect
                | EngineCode::WantAccept
        )
    }
}

/// 对字节流的最小要求：引擎只通过它搬运密文。
pub trait Transport: io::Read + io::Write {}

impl<T: io::Read + io::Write + ?Sized> Transport for T {}

/// TLS 上下文：每个通道创建一次，负责派生会话。
pub trait TlsEngine: Send + Sync {
    type Session: EngineSession;

    fn mode(&self) -> ChannelMode;

    /// 基于上下文创建新的会话；每个通道至多调用一次。
    fn new_session(&self) -> Result<Self::Session, String>;
}

/// 单个 TLS 会话。
pub trait EngineSession: Send {
    /// 把会话绑定到底层描述符。
    fn bind(&mut self, descriptor: SocketDescriptor);

    /// 客户端握手原语。
    fn connect(&mut self, io: &mut dyn Transport) -> isize;

    /// 服务端握手原语。
    fn accept(&mut self, io: &mut dyn Transport) -> isize;

    /// 读取解密后的明文。
    fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> isize;

    /// 写入明文并加密发送。
    fn write(&mut self, io: &mut dyn Transport, buf: &[u8]) -> isize;

    /// 尽力推送引擎内已加密但尚未写出的记录。
    fn flush(&mut self, io: &mut dyn Transport) -> isize;

    /// 发送协议层关闭通知（close_notify）。
    fn shutdown(&mut self, io: &mut dyn Transport) -> isize;

    /// 查询最近一次调用的结果码。
    fn error_code(&self, ret: isize) -> EngineCode;

    fn has_pending_errors(&self) -> bool;

    /// 取出并清空错误队列。
    fn drain_errors(&mut self) -> Vec<String>;

    /// 取出最近一次传输层失败的原始 IO 错误（若引擎记录了的话）。
    fn take_transport_error(&mut self) -> Option<io::Error>;

    /// 对端证书（DER）。
    fn peer_certificate(&self) -> Option<Vec<u8>>;

    /// 协商出的密码套件描述。
    fn cipher_description(&self) -> Option<String>;
}
