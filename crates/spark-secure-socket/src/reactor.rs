//! 反应器作业适配。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手不是一次函数调用，而是若干次“就绪 → 推进”的循环；反应器只认识作业（job），
//!   因此需要一个薄适配层把握手服务包装成作业，并在成功后替换为下一阶段的作业；
//! - 下一阶段由调用方提供的工厂闭包生成，适配层不关心它具体做什么（通常是明文读写作业）。
//!
//! ## 契约（What）
//! - `Established` → [`JobOutcome::Advance`]，携带下一阶段作业；
//! - `Pending` → [`JobOutcome::Continue`]，保持当前作业；
//! - 任意错误 → [`JobOutcome::Terminate`]，断连事件已由通道发出；
//! - 适配层从不直接触碰会话，所有状态变化都经由 [`SecureChannel`] 的握手服务完成。

use std::{fmt, sync::Arc};

use tracing::{debug, trace};

use crate::{
    channel::SecureChannel,
    engine::{ChannelMode, TlsEngine},
    handshake::HandshakeProgress,
    socket::{SocketDescriptor, StreamSocket},
};

/// 作业关注的就绪类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };
}

/// 反应器交给作业的就绪快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// 作业被服务一次之后的去向。
pub enum JobOutcome {
    /// 保留当前作业，等待下一次就绪。
    Continue,
    /// 用新作业替换当前作业。
    Advance(Box<dyn MultiplexerJob>),
    /// 移除当前作业。
    Terminate,
}

impl fmt::Debug for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Continue => f.write_str("Continue"),
            JobOutcome::Advance(job) => f
                .debug_tuple("Advance")
                .field(&job.descriptor())
                .finish(),
            JobOutcome::Terminate => f.write_str("Terminate"),
        }
    }
}

/// 可被反应器调度的作业。
pub trait MultiplexerJob: Send {
    fn descriptor(&self) -> SocketDescriptor;

    fn interest(&self) -> Interest;

    fn service(&mut self, readiness: Readiness) -> JobOutcome;
}

/// 反应器的最小注册接口。
pub trait Reactor {
    fn register_job(&self, job: Box<dyn MultiplexerJob>);
}

/// 握手成功后生成下一阶段作业的工厂。
pub type NextStage = Box<dyn FnOnce() -> Box<dyn MultiplexerJob> + Send>;

/// 把握手服务包装成反应器作业。
pub struct HandshakeJob<S: StreamSocket, E: TlsEngine> {
    channel: Arc<SecureChannel<S, E>>,
    side: ChannelMode,
    interest: Interest,
    next: Option<NextStage>,
}

impl<S: StreamSocket, E: TlsEngine> HandshakeJob<S, E> {
    /// 以通道自身的模式决定握手方向。
    pub fn new(channel: Arc<SecureChannel<S, E>>, interest: Interest, next: NextStage) -> Self {
        let side = channel.mode();
        Self::for_side(channel, side, interest, next)
    }

    fn for_side(
        channel: Arc<SecureChannel<S, E>>,
        side: ChannelMode,
        interest: Interest,
        next: NextStage,
    ) -> Self {
        Self {
            channel,
            side,
            interest,
            next: Some(next),
        }
    }

    pub fn channel(&self) -> &Arc<SecureChannel<S, E>> {
        &self.channel
    }
}

impl<S, E> MultiplexerJob for HandshakeJob<S, E>
where
    S: StreamSocket,
    E: TlsEngine,
{
    fn descriptor(&self) -> SocketDescriptor {
        self.channel.descriptor()
    }

    fn interest(&self) -> Interest {
        self.interest
    }

    fn service(&mut self, readiness: Readiness) -> JobOutcome {
        trace!(channel = %self.channel.descriptor(), ?readiness, "servicing handshake job");
        let progress = match self.side {
            ChannelMode::Client => self.channel.service_connect(),
            ChannelMode::Server => self.channel.service_accept(),
        };
        match progress {
            Ok(HandshakeProgress::Pending { .. }) => JobOutcome::Continue,
            Ok(HandshakeProgress::Established) => match self.next.take() {
                Some(next) => JobOutcome::Advance(next()),
                None => JobOutcome::Terminate,
            },
            Err(err) => {
                debug!(
                    channel = %self.channel.descriptor(),
                    code = err.code(),
                    error = %err,
                    "handshake job terminated"
                );
                JobOutcome::Terminate
            }
        }
    }
}

impl<S, E> SecureChannel<S, E>
where
    S: StreamSocket + 'static,
    E: TlsEngine + 'static,
{
    /// 向反应器注册客户端握手作业。
    pub fn begin_connect<R>(self: &Arc<Self>, reactor: &R, interest: Interest, next: NextStage)
    where
        R: Reactor + ?Sized,
    {
        self.begin(ChannelMode::Client, reactor, interest, next);
    }

    /// 向反应器注册服务端握手作业。
    pub fn begin_accept<R>(self: &Arc<Self>, reactor: &R, interest: Interest, next: NextStage)
    where
        R: Reactor + ?Sized,
    {
        self.begin(ChannelMode::Server, reactor, interest, next);
    }

    fn begin<R>(self: &Arc<Self>, side: ChannelMode, reactor: &R, interest: Interest, next: NextStage)
    where
        R: Reactor + ?Sized,
    {
        debug!(channel = %self.descriptor(), %side, "registering handshake job");
        let job = HandshakeJob::for_side(Arc::clone(self), side, interest, next);
        reactor.register_job(Box::new(job));
    }
}
