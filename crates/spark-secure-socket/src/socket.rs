use std::{fmt, io, net::Shutdown};

use socket2::Socket;

/// 底层套接字描述符的可打印形式。
///
/// Unix 上对应 fd，Windows 上对应 `SOCKET`；仅用于绑定会话与日志关联，不参与 IO。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketDescriptor(u64);

impl SocketDescriptor {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// 安全通道所依赖的明文流套接字。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 建连、监听与地址处理不属于本 crate，本 trait 只描述 TLS 适配层真正需要的能力；
/// - 读写必须是非阻塞的：`WouldBlock` 是常态，由引擎翻译为 want-read / want-write。
///
/// ## 契约（What）
/// - `Read`/`Write`：明文字节流，原样交给 TLS 引擎承载密文；
/// - `descriptor`：会话绑定与反应器注册使用的描述符；
/// - `take_error`：查询并清除挂起的套接字错误（`SO_ERROR`），供分类器记录传输层失败原因；
/// - `close`：关闭底层连接，需可重复调用。
pub trait StreamSocket: io::Read + io::Write + Send {
    fn descriptor(&self) -> SocketDescriptor;

    fn take_error(&self) -> io::Result<Option<io::Error>>;

    fn close(&mut self) -> io::Result<()>;
}

impl StreamSocket for Socket {
    fn descriptor(&self) -> SocketDescriptor {
        raw_descriptor(self)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Socket::take_error(self)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // 对端先行断开或重复关闭都视为已关闭。
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// 把已建立的 `socket2::Socket` 切换为非阻塞模式，供安全通道使用。
pub fn prepare_nonblocking(socket: &Socket) -> io::Result<()> {
    socket.set_nonblocking(true)
}

#[cfg(unix)]
fn raw_descriptor(socket: &Socket) -> SocketDescriptor {
    use std::os::fd::AsRawFd;
    SocketDescriptor::new(socket.as_raw_fd() as u64)
}

#[cfg(windows)]
fn raw_descriptor(socket: &Socket) -> SocketDescriptor {
    use std::os::windows::io::AsRawSocket;
    SocketDescriptor::new(socket.as_raw_socket())
}
