use crate::{
    HvsockConn,
    config::FramingConfig,
    error::{self, HvsockError, map_io_error},
};
use hvsock_transport::{HvsockAddr, RawAcceptor, RawTransport};
use tracing::debug;

/// 对原始监听句柄的分帧封装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 服务端只面对 [`HvsockConn`]：每个被接受的原始流都立即包装为拥有独立写锁的分帧连接；
/// - 监听器本身不参与分帧协议，关闭监听不会影响已经接受的连接。
///
/// ## 逻辑 (How)
/// - `bind`：通过 [`RawTransport::listen`] 获得原始监听句柄，失败映射为 `hvsock.framed.listen_failed`；
/// - `accept`：等待一条原始流，以监听地址为本地地址、底层报告的地址为对端地址构造连接；
/// - `close`：转交底层句柄，之后的 `accept` 返回底层错误。
///
/// ## 契约 (What)
/// - **前置条件**：需在 Tokio 运行时中使用；
/// - **后置条件**：`accept` 返回的连接使用监听器的默认配置，读写两个方向均为打开状态。
///
/// ## 注意事项 (Trade-offs)
/// - 接受是串行的，需要并发处理时由上层为每条连接派生任务。
#[derive(Debug)]
pub struct HvsockListener<A> {
    inner: A,
    local_addr: HvsockAddr,
    default_config: FramingConfig,
}

impl<A: RawAcceptor> HvsockListener<A> {
    /// 在指定地址上监听。
    pub async fn bind<T>(transport: &T, addr: HvsockAddr) -> Result<Self, HvsockError>
    where
        T: RawTransport<Acceptor = A>,
    {
        Self::bind_with_config(transport, addr, FramingConfig::default()).await
    }

    /// 在指定地址上监听，并为后续接受的连接预设分帧配置。
    ///
    /// 配置在绑定前校验，非法配置不会占用地址。
    pub async fn bind_with_config<T>(
        transport: &T,
        addr: HvsockAddr,
        default_config: FramingConfig,
    ) -> Result<Self, HvsockError>
    where
        T: RawTransport<Acceptor = A>,
    {
        default_config.validate()?;
        let acceptor = transport
            .listen(addr)
            .await
            .map_err(|err| map_io_error(error::LISTEN, err))?;
        Self::from_acceptor(acceptor, default_config)
    }

    /// 包装一个已经处于监听状态的原始句柄。
    pub fn from_acceptor(acceptor: A, default_config: FramingConfig) -> Result<Self, HvsockError> {
        default_config.validate()?;
        let local_addr = acceptor.local_addr();
        debug!(addr = %local_addr, "hvsock 监听器就绪");
        Ok(Self {
            inner: acceptor,
            local_addr,
            default_config,
        })
    }

    /// 监听地址。
    pub fn local_addr(&self) -> HvsockAddr {
        self.local_addr
    }

    /// 新连接继承的默认配置。
    pub fn default_config(&self) -> &FramingConfig {
        &self.default_config
    }

    /// 接受一条入站连接，返回连接及其对端地址。
    pub async fn accept(&self) -> Result<(HvsockConn<A::Stream>, HvsockAddr), HvsockError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        let conn = HvsockConn::new(stream, self.local_addr, peer, self.default_config.clone())?;
        Ok((conn, peer))
    }

    /// 停止监听。
    pub fn close(&self) -> Result<(), HvsockError> {
        self.inner
            .close()
            .map_err(|err| map_io_error(error::LISTENER_CLOSE, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvsock_transport::{Guid, MemoryTransport};

    const SERVICE: Guid = Guid::from_fields(
        0x0000_2000,
        0xfacb,
        0x11e6,
        [0xbd, 0x58, 0x64, 0x00, 0x6a, 0x79, 0x86, 0xd3],
    );

    #[tokio::test(flavor = "multi_thread")]
    async fn accepted_conn_carries_listener_and_peer_addrs() {
        let transport = MemoryTransport::new();
        let listener = HvsockListener::bind(&transport, HvsockAddr::new(Guid::WILDCARD, SERVICE))
            .await
            .expect("bind");
        assert_eq!(listener.local_addr().service_id(), SERVICE);

        let target = HvsockAddr::new(Guid::LOOPBACK, SERVICE);
        let client = HvsockConn::connect(&transport, target).await.expect("dial");
        let (server, peer) = listener.accept().await.expect("accept");

        assert_eq!(client.local_addr(), HvsockAddr::UNSPECIFIED);
        assert_eq!(client.peer_addr(), target);
        assert_eq!(server.local_addr(), listener.local_addr());
        assert_eq!(server.peer_addr(), peer);
        assert_ne!(client.id(), server.id());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_failures_carry_listen_code() {
        let transport = MemoryTransport::new();
        let addr = HvsockAddr::new(Guid::WILDCARD, SERVICE);
        let _first = HvsockListener::bind(&transport, addr).await.expect("bind");
        let err = HvsockListener::bind(&transport, addr)
            .await
            .expect_err("address in use");
        assert_eq!(err.code(), "hvsock.framed.listen_failed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_after_close_fails() {
        let transport = MemoryTransport::new();
        let listener = HvsockListener::bind(&transport, HvsockAddr::new(Guid::WILDCARD, SERVICE))
            .await
            .expect("bind");
        listener.close().expect("close");
        let err = listener.accept().await.expect_err("closed");
        assert_eq!(err.code(), "hvsock.framed.accept_failed");
    }
}
