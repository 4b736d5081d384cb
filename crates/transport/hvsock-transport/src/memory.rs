//! 进程内回环传输。
//!
//! # 模块定位（Why）
//! - Hyper-V 套接字需要特定内核与虚拟化环境，测试与演示程序无法依赖真实平台；
//! - 本模块以 `tokio::io::duplex` 管道模拟“拨号 → 接受”，让分帧核心在任意平台上跑通完整握手。
//!
//! # 行为（What）
//! - 以 [`HvsockAddr`] 为键维护监听表；绑定在 `(WILDCARD, svc)` 上的监听器接受发往任意 VM ID 的同服务拨号；
//! - 目标不存在返回 `ConnectionRefused`，重复绑定返回 `AddrInUse`，监听关闭后 `accept` 返回 `ConnectionAborted`；
//! - 被接受的连接以 `(传输自身 VM ID, 临时服务 ID)` 作为对端地址。

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::DuplexStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;

use crate::{Guid, HvsockAddr, RawAcceptor, RawTransport};

/// 单个管道方向的默认缓冲容量，足以容纳一条满载消息及其报文头。
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// 监听队列深度，与常见平台的 `SOMAXCONN` 相当。
const BACKLOG: usize = 128;

type PendingConn = (DuplexStream, HvsockAddr);

#[derive(Debug)]
struct Listening {
    id: u64,
    sender: mpsc::Sender<PendingConn>,
}

#[derive(Debug)]
struct Registry {
    listeners: Mutex<HashMap<HvsockAddr, Listening>>,
    vm_id: Guid,
    pipe_capacity: usize,
    next_ephemeral: AtomicU32,
    next_listener: AtomicU64,
}

impl Registry {
    fn listeners(&self) -> MutexGuard<'_, HashMap<HvsockAddr, Listening>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, addr: HvsockAddr) -> Option<mpsc::Sender<PendingConn>> {
        let listeners = self.listeners();
        listeners
            .get(&addr)
            .or_else(|| listeners.get(&HvsockAddr::new(Guid::WILDCARD, addr.service_id())))
            .map(|listening| listening.sender.clone())
    }

    /// 仅移除属于 `id` 的表项，避免误删同地址上后来绑定的监听器。
    fn unregister(&self, addr: HvsockAddr, id: u64) -> bool {
        let mut listeners = self.listeners();
        if listeners.get(&addr).is_some_and(|listening| listening.id == id) {
            listeners.remove(&addr);
            return true;
        }
        false
    }

    fn ephemeral_addr(&self) -> HvsockAddr {
        let port = self.next_ephemeral.fetch_add(1, Ordering::Relaxed);
        HvsockAddr::new(self.vm_id, Guid::from_fields(port, 0, 0, [0; 8]))
    }
}

/// 进程内 Hyper-V 套接字传输。
///
/// 克隆体共享同一张监听表，可分别交给服务端与客户端任务使用。
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    registry: Arc<Registry>,
}

impl MemoryTransport {
    /// 以 `LOOPBACK` 作为本端 VM ID、默认管道容量创建传输。
    pub fn new() -> Self {
        Self::with_options(Guid::LOOPBACK, DEFAULT_PIPE_CAPACITY)
    }

    /// 指定本端 VM ID 与单向管道容量。
    ///
    /// 较小的容量会让写入更早阻塞，测试可借此制造读写交错。
    pub fn with_options(vm_id: Guid, pipe_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(HashMap::new()),
                vm_id,
                pipe_capacity: pipe_capacity.max(1),
                next_ephemeral: AtomicU32::new(1),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// 本端 VM ID。
    pub fn vm_id(&self) -> Guid {
        self.registry.vm_id
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTransport for MemoryTransport {
    type Stream = DuplexStream;
    type Acceptor = MemoryAcceptor;

    fn connect(&self, addr: HvsockAddr) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let registry = Arc::clone(&self.registry);
        async move {
            let sender = registry.lookup(addr).ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, format!("{addr} 无监听者"))
            })?;
            let (local, remote) = tokio::io::duplex(registry.pipe_capacity);
            let peer = registry.ephemeral_addr();
            sender.send((remote, peer)).await.map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, format!("{addr} 监听已关闭"))
            })?;
            debug!(%addr, %peer, "内存传输建立连接");
            Ok(local)
        }
    }

    fn listen(&self, addr: HvsockAddr) -> impl Future<Output = io::Result<MemoryAcceptor>> + Send {
        let registry = Arc::clone(&self.registry);
        async move {
            let (tx, rx) = mpsc::channel(BACKLOG);
            let id = registry.next_listener.fetch_add(1, Ordering::Relaxed);
            {
                let mut listeners = registry.listeners();
                if listeners.contains_key(&addr) {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{addr} 已被占用"),
                    ));
                }
                listeners.insert(addr, Listening { id, sender: tx });
            }
            debug!(%addr, "内存传输开始监听");
            Ok(MemoryAcceptor {
                addr,
                id,
                incoming: AsyncMutex::new(rx),
                registry,
            })
        }
    }
}

/// [`MemoryTransport`] 的监听句柄。
#[derive(Debug)]
pub struct MemoryAcceptor {
    addr: HvsockAddr,
    id: u64,
    incoming: AsyncMutex<mpsc::Receiver<PendingConn>>,
    registry: Arc<Registry>,
}

impl RawAcceptor for MemoryAcceptor {
    type Stream = DuplexStream;

    fn local_addr(&self) -> HvsockAddr {
        self.addr
    }

    fn accept(&self) -> impl Future<Output = io::Result<(DuplexStream, HvsockAddr)>> + Send {
        async move {
            let mut incoming = self.incoming.lock().await;
            incoming.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "监听句柄已释放")
            })
        }
    }

    fn close(&self) -> io::Result<()> {
        // 只移除监听表项：已排队的连接仍可被接受，队列耗尽后 `accept` 返回 `ConnectionAborted`。
        if self.registry.unregister(self.addr, self.id) {
            debug!(addr = %self.addr, "内存传输停止监听");
        }
        Ok(())
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        self.registry.unregister(self.addr, self.id);
    }
}
