use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, trace, warn};

use crate::{
    engine::{EngineCode, EngineSession},
    socket::StreamSocket,
};

/// 单次引擎调用的归类结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// 操作完成，重试计数已清零。
    Complete,
    /// 需要等待下一次就绪事件；携带当前连续重试次数。
    Retry(u32),
    /// 通道不可继续使用。
    Fatal,
}

impl Outcome {
    pub fn is_fatal(self) -> bool {
        matches!(self, Outcome::Fatal)
    }
}

/// 引擎结果分类器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎的结果码五花八门，但通道只关心三件事：完成、稍后重试、致命；
///   分类逻辑集中在这一处，调用点不再散落对原始整数的分支判断；
/// - want-read / want-write 在非阻塞握手中极其频繁（单次握手数万次也属正常），
///   既不能当作错误，也不能以高于 trace 的级别记录。
///
/// ## 逻辑（How）
/// 1. 通过会话查询本次调用的 [`EngineCode`]；
/// 2. 按结果码归类，并累加或清零重试计数；
/// 3. 连续重试次数超过上限时强制判定为致命（失控重试保护，相当于以次数计量的握手超时）；
/// 4. 致命时清零计数，并把引擎错误队列中的全部消息写入日志。
///
/// ## 契约（What）
/// - 计数归属于单个通道实例，多个通道之间互不影响；
/// - 分类器本身不触发断连事件：通道根据 [`Outcome::Fatal`] 与 [`FatalLatch`] 保证事件只发一次；
/// - 查询套接字挂起错误失败时只记录日志，绝不打断分类流程。
#[derive(Debug)]
pub struct ResultClassifier {
    // 比上限宽一档，`max_retry == u32::MAX` 时计数仍能越过上限。
    retry: u64,
    max_retry: u32,
}

impl ResultClassifier {
    pub fn new(max_retry: u32) -> Self {
        Self {
            retry: 0,
            max_retry,
        }
    }

    pub fn retry_count(&self) -> u32 {
        u32::try_from(self.retry).unwrap_or(u32::MAX)
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// 对一次引擎调用的原始返回值进行归类。
    pub fn classify(
        &mut self,
        ret: isize,
        session: &mut dyn EngineSession,
        socket: &dyn StreamSocket,
    ) -> Outcome {
        let code = session.error_code(ret);
        let mut fatal = false;

        match code {
            EngineCode::None => {
                self.retry = 0;
            }
            EngineCode::ZeroReturn => {
                debug!("ssl connection closed");
                fatal = true;
            }
            EngineCode::WantRead
            | EngineCode::WantWrite
            | EngineCode::WantConnect
            | EngineCode::WantAccept => {
                self.retry = self.retry.saturating_add(1);
                trace!(?code, attempt = self.retry, "passive ssl error");
            }
            EngineCode::Syscall => {
                error!("ssl error occurred (system call failure)");
                if !session.has_pending_errors() {
                    if ret == 0 {
                        error!("eof violates ssl protocol");
                    } else if ret < 0 {
                        log_socket_error(session, socket);
                    }
                }
                fatal = true;
            }
            EngineCode::Ssl => {
                error!("ssl error occurred (generic failure)");
                fatal = true;
            }
            EngineCode::Other(raw) => {
                error!(code = raw, "ssl error occurred (unknown failure)");
                fatal = true;
            }
        }

        if self.retry > u64::from(self.max_retry) {
            error!(attempt = self.retry, "passive ssl error limit exceeded");
            fatal = true;
        }

        if fatal {
            self.retry = 0;
            for message in session.drain_errors() {
                error!("{message}");
            }
            return Outcome::Fatal;
        }

        if code.is_want() {
            Outcome::Retry(self.retry_count())
        } else {
            Outcome::Complete
        }
    }

    /// 在不经过引擎的情况下清零计数（例如通道被显式关闭）。
    pub fn reset(&mut self) {
        self.retry = 0;
    }
}

fn log_socket_error(session: &mut dyn EngineSession, socket: &dyn StreamSocket) {
    match socket.take_error() {
        Ok(Some(err)) => error!(error = %err, "socket error"),
        Ok(None) => match session.take_transport_error() {
            Some(err) => error!(error = %err, "socket error"),
            None => debug!("no pending socket error reported"),
        },
        Err(err) => warn!(error = %err, "failed to query socket error"),
    }
}

/// 单调的致命标记。
///
/// `trip` 只有在第一次把标记从 `false` 翻到 `true` 时返回 `true`，
/// 调用方据此保证断连事件恰好发送一次。
#[derive(Debug, Default)]
pub struct FatalLatch {
    fatal: AtomicBool,
}

impl FatalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) -> bool {
        self.fatal
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_tripped(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}
