use core::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::HvsockAddr;

/// 已建立的底层双工字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 分帧核心只依赖“原始读”“原始写”“原始释放”，Windows 异步句柄、
///   Linux 原生套接字与进程内管道因此可以统一为一种形状；
/// - 直接借用 Tokio 的 `AsyncRead`/`AsyncWrite`：`poll_read` 对应原始读，
///   `poll_write` 对应原始写，`poll_shutdown` 加上丢弃句柄对应原始释放。
///
/// ## 契约（What）
/// - 实现者须保证读写可以被拆分到不同任务并发执行（由 `tokio::io::split` 完成拆分）；
/// - 截止时间等能力若平台支持，应由实现自身暴露，分帧层不介入。
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// 底层传输：负责创建套接字、拨号与绑定监听。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对应平台系统调用 `socket()` + `connect()` 与 `socket()` + `bind()` + `listen()`；
/// - 把平台差异挡在分帧核心之外，核心仅消费已建立的 [`RawStream`]。
///
/// ## 契约（What）
/// - `connect`：返回已连通的原始流；失败返回底层 `io::Error`，不做重试；
/// - `listen`：返回已绑定且处于监听状态的 [`RawAcceptor`]。
///
/// ## 风险提示（Trade-offs）
/// - 返回的 Future 必须是 `Send`，以便在多线程运行时中跨任务移动。
pub trait RawTransport: Send + Sync + 'static {
    /// 建连产出的原始流类型。
    type Stream: RawStream;
    /// 监听句柄类型。
    type Acceptor: RawAcceptor<Stream = Self::Stream>;

    /// 创建套接字并连接到目标地址。
    fn connect(&self, addr: HvsockAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// 创建套接字、绑定地址并开始监听。
    fn listen(&self, addr: HvsockAddr)
    -> impl Future<Output = io::Result<Self::Acceptor>> + Send;
}

/// 已绑定、已监听的原始套接字。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `accept` 阻塞直到新连接到达，返回原始流与对端地址；
/// - `close` 只释放监听句柄，能否唤醒正在进行的 `accept` 取决于具体平台；
/// - `local_addr` 返回绑定时使用的地址。
pub trait RawAcceptor: Send + Sync + 'static {
    /// 接受得到的原始流类型。
    type Stream: RawStream;

    /// 监听地址。
    fn local_addr(&self) -> HvsockAddr;

    /// 接受一个入站连接。
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, HvsockAddr)>> + Send;

    /// 释放监听句柄。
    fn close(&self) -> io::Result<()>;
}
