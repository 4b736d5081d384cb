#![deny(unsafe_code)]
#![doc = r#"
# hvsock-transport-framed

## 设计动机（Why）
- **定位**：Hyper-V 套接字的底层句柄只能整体拆除，无法单独关闭某个方向；
  本 crate 在其上合成 TCP 式的半关闭语义（`close_read`/`close_write`）与带确认的完整关闭。
- **架构角色**：位于原始传输（[`hvsock_transport::RawTransport`]）之上，向应用暴露
  普通字节流式的 [`HvsockConn`] 与 [`HvsockListener`]。
- **设计理念**：所有信号都走带内控制报文，线上格式固定，两端配置不同也能互通。

## 核心契约（What）
- **线上格式**：每个单元以 4 字节小端报文头开始，数据长度头之后跟随等长负载，
  三个保留哨兵表示读关闭、写关闭与完整关闭，详见 [`frame`]；
- **写入原子性**：报文头与其负载在连接级写锁内整体写出，控制报文绝不会插入一条数据消息中间；
- **字节流透明**：调用级写入按 [`FramingConfig::max_message_size`] 切块，接收端只看到连续字节；
- **错误语义**：失败以 [`HvsockError`] 返回并携带稳定错误码，必要时可转换为 `std::io::Error`。

## 实现策略（How）
- **执行框架**：依赖 Tokio；原始流经 `tokio::io::split` 拆分，写半部由 `tokio::sync::Mutex` 守护；
- **控制报文处理**：在 `read` 内部同步消费，对调用方透明；
- **关闭握手**：发送关闭请求后尽力读取一次回应，随后无条件且只释放一次底层句柄。

## 风险与考量（Trade-offs）
- **被动端依赖读取**：从不调用 `read` 的一端永远不会观察到对端的控制报文；
- **关闭唤醒**：本端关闭是否唤醒阻塞在原始流上的读任务取决于底层传输。
"#]

pub mod config;
mod conn;
mod error;
pub mod frame;
mod listener;

pub use config::FramingConfig;
pub use conn::{ConnState, HvsockConn};
pub use error::{HvsockError, OperationKind};
pub use hvsock_transport::{HvsockAddr, ShutdownDirection};
pub use listener::HvsockListener;

use hvsock_transport::RawTransport;

/// 以默认配置拨号，等价于 [`HvsockConn::connect`]。
pub async fn dial<T: RawTransport>(
    transport: &T,
    addr: HvsockAddr,
) -> Result<HvsockConn<T::Stream>, HvsockError> {
    HvsockConn::connect(transport, addr).await
}

/// 以指定配置拨号。
pub async fn dial_with_config<T: RawTransport>(
    transport: &T,
    addr: HvsockAddr,
    config: FramingConfig,
) -> Result<HvsockConn<T::Stream>, HvsockError> {
    HvsockConn::connect_with_config(transport, addr, config).await
}
