use crate::{
    config::FramingConfig,
    error::{self, HvsockError, map_io_error, unexpected_eof},
    frame::{Control, HEADER_LEN, Header, message_count},
};
use hvsock_transport::{HvsockAddr, RawStream, RawTransport, ShutdownDirection};
use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    runtime::Handle,
    sync::Mutex as AsyncMutex,
};
use tracing::{debug, trace, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// 连接的方向状态快照。
///
/// 转换单调：任何状态都不会回到 `Open`；`close` 直接跳到 `Closed`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// 读写均可用。
    Open,
    /// 读方向已关闭。
    ReadClosed,
    /// 写方向已关闭。
    WriteClosed,
    /// 读写均已关闭。
    Closed,
}

/// 读半部及其“负载待读”状态，只由单个读任务驱动。
///
/// 未读满的报文头字节也保存在这里：`read` 在报文头中途被取消时，下一次调用从断点继续。
struct ReadSide<S> {
    half: Option<ReadHalf<S>>,
    pending: usize,
    header: [u8; HEADER_LEN],
    filled: usize,
}

impl<S> ReadSide<S> {
    fn drop_half(&mut self) {
        self.half.take();
        self.pending = 0;
        self.filled = 0;
    }
}

struct ConnInner<S> {
    id: u64,
    reader: AsyncMutex<ReadSide<S>>,
    /// 写锁：报文头与其负载（或单独的控制报文头）在持锁期间作为整体写出。
    writer: AsyncMutex<Option<WriteHalf<S>>>,
    read_closed: AtomicBool,
    write_closed: AtomicBool,
    released: AtomicBool,
    local_addr: HvsockAddr,
    peer_addr: HvsockAddr,
    config: FramingConfig,
}

/// 支持半关闭的 Hyper-V 套接字连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 底层原始流只能整体拆除；本类型在单条字节流上复用“长度前缀数据消息”与三种控制报文，
///   向调用方呈现 TCP 式的 `close_read`/`close_write`/`close` 语义；
/// - 对外仍是普通字节流：调用方看不到消息边界。
///
/// ## 逻辑 (How)
/// - 原始流经 `tokio::io::split` 拆成读写两半；写半部放在 `tokio::sync::Mutex` 中充当写锁，
///   每次只覆盖一条消息，长写入在块与块之间释放锁，控制报文最多等待一块在途数据；
/// - 读半部由单个读任务驱动：读到数据长度头后进入“负载待读”状态，读到控制报文则在
///   `read` 内部同步处理，不向调用方暴露；
/// - `read_closed`/`write_closed`/`released` 为原子标志，读路径处理对端控制报文时可直接修改写方向状态。
///
/// ## 契约 (What)
/// - `read`：返回 `Ok(0)` 表示流结束（对端写关闭、对端关闭或本端已关闭读）；
/// - `write`：按配置切块；中途失败时返回已完整写出的负载字节数，少于请求即为致命状态；
/// - `close_read`/`close_write`：发送对应控制报文，成功后才修改本端状态；重复调用返回
///   [`HvsockError::AlreadyClosed`] 且不会再次发送；
/// - `close`：立即关闭两个方向、发送关闭请求、尽力等待一次回应，最终无条件释放底层句柄，且只释放一次。
///
/// ## 注意事项 (Trade-offs)
/// - 控制报文只在 `read` 中被消费：从不调用 `read` 的一端永远感知不到对端的关闭信号；
/// - 同一连接上不应并发调用 `read`；内部读锁只保证内存安全，不提供有意义的交错语义；
/// - 本端关闭不保证唤醒阻塞在原始流上的读任务，取决于底层传输；
/// - 所有操作都可被取消（超时或 `select!` 丢弃 Future）：半条消息已上线后被取消的写入会让写方向
///   致命关闭，被取消的 `read` 保留已读到的报文头字节，被取消的 `close` 仍会释放底层句柄。
pub struct HvsockConn<S> {
    inner: Arc<ConnInner<S>>,
}

impl<S> Clone for HvsockConn<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for HvsockConn<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HvsockConn")
            .field("id", &self.inner.id)
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl<S> HvsockConn<S> {
    /// 进程内唯一的连接编号，出现在所有日志事件的 `conn` 字段中。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 获取本地地址。
    pub fn local_addr(&self) -> HvsockAddr {
        self.inner.local_addr
    }

    /// 获取对端地址。
    pub fn peer_addr(&self) -> HvsockAddr {
        self.inner.peer_addr
    }

    /// 返回构造时使用的分帧配置。
    pub fn config(&self) -> &FramingConfig {
        &self.inner.config
    }

    /// 当前方向状态。
    pub fn state(&self) -> ConnState {
        match (self.is_read_closed(), self.is_write_closed()) {
            (false, false) => ConnState::Open,
            (true, false) => ConnState::ReadClosed,
            (false, true) => ConnState::WriteClosed,
            (true, true) => ConnState::Closed,
        }
    }

    /// 读方向是否已关闭。
    pub fn is_read_closed(&self) -> bool {
        self.inner.read_closed.load(Ordering::Acquire)
    }

    /// 写方向是否已关闭。
    pub fn is_write_closed(&self) -> bool {
        self.inner.write_closed.load(Ordering::Acquire)
    }

    fn mark_read_closed(&self) {
        self.inner.read_closed.store(true, Ordering::Release);
    }

    fn mark_write_closed(&self) {
        self.inner.write_closed.store(true, Ordering::Release);
    }
}

impl<S: RawStream> HvsockConn<S> {
    /// 包装一条已建立的原始流。
    ///
    /// # 教案级注释
    ///
    /// ## 契约（What）
    /// - `stream`：刚建立或刚接受的原始双工流，所有权转移给连接；
    /// - `local_addr`/`peer_addr`：连接元数据，构造后不可变；
    /// - `config`：先经 [`FramingConfig::validate`] 校验，越界时返回 [`HvsockError::InvalidConfig`]；
    /// - **后置条件**：返回的连接拥有独立的写锁，读写两个方向均为打开状态。
    pub fn new(
        stream: S,
        local_addr: HvsockAddr,
        peer_addr: HvsockAddr,
        config: FramingConfig,
    ) -> Result<Self, HvsockError> {
        config.validate()?;
        let (read_half, write_half) = tokio::io::split(stream);
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, local = %local_addr, peer = %peer_addr, "hvsock 连接建立");
        Ok(Self {
            inner: Arc::new(ConnInner {
                id,
                reader: AsyncMutex::new(ReadSide {
                    half: Some(read_half),
                    pending: 0,
                    header: [0; HEADER_LEN],
                    filled: 0,
                }),
                writer: AsyncMutex::new(Some(write_half)),
                read_closed: AtomicBool::new(false),
                write_closed: AtomicBool::new(false),
                released: AtomicBool::new(false),
                local_addr,
                peer_addr,
                config,
            }),
        })
    }

    /// 通过底层传输拨号并包装为分帧连接。
    pub async fn connect<T>(transport: &T, addr: HvsockAddr) -> Result<Self, HvsockError>
    where
        T: RawTransport<Stream = S>,
    {
        Self::connect_with_config(transport, addr, FramingConfig::default()).await
    }

    /// 以指定配置拨号。
    ///
    /// 本地地址固定为 [`HvsockAddr::UNSPECIFIED`]，底层拨号失败原样映射为
    /// `hvsock.framed.connect_failed`，不做重试。
    pub async fn connect_with_config<T>(
        transport: &T,
        addr: HvsockAddr,
        config: FramingConfig,
    ) -> Result<Self, HvsockError>
    where
        T: RawTransport<Stream = S>,
    {
        config.validate()?;
        let stream = transport
            .connect(addr)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Self::new(stream, HvsockAddr::UNSPECIFIED, addr, config)
    }

    /// 读取数据到缓冲区。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 读方向已关闭时立即返回 `Ok(0)`，不触碰原始流；
    /// 2. 没有待读负载时循环读取报文头：数据长度头进入“负载待读”，零长度消息被跳过，
    ///    控制报文就地处理（写关闭 → 流结束；读关闭 → 本端写方向关闭；关闭 → 回应关闭握手并释放）；
    /// 3. 负载待读时只读 `min(buf.len(), pending)` 字节，绝不跨越消息边界。
    ///
    /// ## 契约（What）
    /// - 原始流在报文头或负载中途结束、或返回错误时，读方向被标记为关闭并返回错误；
    /// - 报文头只收到 1~3 字节即结束时返回 [`HvsockError::MalformedHeader`]；
    /// - 读方向的致命错误只关闭读方向，底层句柄保留到 `close` 或最后一个句柄被丢弃时才释放，
    ///   写方向仍可继续使用；
    /// - 空缓冲区直接返回 `Ok(0)`。
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, HvsockError> {
        if self.is_read_closed() {
            return Ok(0);
        }
        let mut side = self.inner.reader.lock().await;
        if self.is_read_closed() {
            if self.inner.released.load(Ordering::Acquire) {
                side.drop_half();
            }
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        while side.pending == 0 {
            let header = match read_header(&mut side).await {
                Ok(Some(header)) => header,
                Ok(None) => {
                    self.mark_read_closed();
                    return Ok(0);
                }
                Err(err) => {
                    self.mark_read_closed();
                    warn!(conn = self.inner.id, error = %err, "读取报文头失败，读方向关闭");
                    return Err(err);
                }
            };
            match header {
                Header::Data(0) => {
                    trace!(conn = self.inner.id, "跳过零长度数据消息");
                }
                Header::Data(_) => {
                    side.pending = header.payload_len();
                }
                Header::Control(Control::ShutdownWrite) => {
                    self.mark_read_closed();
                    debug!(conn = self.inner.id, "收到对端写关闭");
                    return Ok(0);
                }
                Header::Control(Control::ShutdownRead) => {
                    self.mark_write_closed();
                    debug!(conn = self.inner.id, "收到对端读关闭");
                }
                Header::Control(Control::Close) => {
                    debug!(conn = self.inner.id, "收到对端关闭请求");
                    self.mark_write_closed();
                    if let Err(err) = self.close_with_reader(Some(&mut *side)).await {
                        debug!(conn = self.inner.id, error = %err, "回应对端关闭时释放失败");
                    }
                    return Ok(0);
                }
            }
        }

        let to_read = buf.len().min(side.pending);
        let Some(half) = side.half.as_mut() else {
            self.mark_read_closed();
            return Ok(0);
        };
        match half.read(&mut buf[..to_read]).await {
            Ok(0) => {
                self.mark_read_closed();
                Err(unexpected_eof(error::READ, "负载未读完时原始流结束"))
            }
            Ok(n) => {
                side.pending -= n;
                trace!(conn = self.inner.id, n, remaining = side.pending, "读取负载");
                Ok(n)
            }
            Err(err) => {
                self.mark_read_closed();
                warn!(conn = self.inner.id, error = %err, "读取负载失败，读方向关闭");
                Err(map_io_error(error::READ, err))
            }
        }
    }

    /// 写入整个缓冲区，按配置切块为多条数据消息。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// - 每块独立获取写锁，报文头与负载在持锁期间整体写出，块与块之间释放写锁；
    /// - 空缓冲区仍写出一条零长度数据消息，接收端会将其跳过。
    ///
    /// ## 契约（What）
    /// - 写方向已关闭时立即返回 [`HvsockError::AlreadyClosed`]；
    /// - 任一块写失败都会关闭写方向；若此前已有块完整写出，返回这些块的负载字节数，
    ///   调用方应把“返回值小于请求长度”视为致命状态而非可重试的短写；
    /// - 写失败不会释放底层句柄，读方向照常工作，句柄直到 `close` 或最后一个句柄被丢弃时才释放；
    /// - 在一条消息写到一半时取消本调用，写方向同样致命关闭，线上不会再出现任何后续字节；
    /// - 需要严格全量语义时使用 [`HvsockConn::write_all`]。
    pub async fn write(&self, buf: &[u8]) -> Result<usize, HvsockError> {
        if self.is_write_closed() {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Write));
        }
        if buf.is_empty() {
            self.write_message(buf).await?;
            return Ok(0);
        }

        let max = self.inner.config.max_message_size();
        trace!(
            conn = self.inner.id,
            len = buf.len(),
            messages = message_count(buf.len(), max),
            "切块写入"
        );
        let mut written = 0;
        for chunk in buf.chunks(max as usize) {
            match self.write_message(chunk).await {
                Ok(()) => written += chunk.len(),
                Err(err) if written == 0 => return Err(err),
                Err(err) => {
                    warn!(conn = self.inner.id, written, error = %err, "写入中途失败");
                    return Ok(written);
                }
            }
        }
        Ok(written)
    }

    /// 写入整个缓冲区，未能全部写出时返回 [`HvsockError::ShortWrite`]。
    pub async fn write_all(&self, buf: &[u8]) -> Result<(), HvsockError> {
        let written = self.write(buf).await?;
        if written < buf.len() {
            return Err(HvsockError::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
        Ok(())
    }

    /// 关闭读方向：通知对端停止发送。
    ///
    /// 控制报文确认写出后才标记本端读关闭；发送失败且线上没有留下任何字节时本端状态保持不变，
    /// 调用方可重试或升级为 `close`。控制报文只写出一部分时写方向随之致命关闭。
    pub async fn close_read(&self) -> Result<(), HvsockError> {
        let mut writer = self.inner.writer.lock().await;
        if self.is_read_closed() {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Read));
        }
        write_control(&mut *writer, &self.inner.write_closed, Control::ShutdownRead).await?;
        self.mark_read_closed();
        debug!(conn = self.inner.id, "已发送读关闭");
        Ok(())
    }

    /// 关闭写方向：对端读到流结束。
    pub async fn close_write(&self) -> Result<(), HvsockError> {
        let mut writer = self.inner.writer.lock().await;
        if self.is_write_closed() {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Write));
        }
        write_control(&mut *writer, &self.inner.write_closed, Control::ShutdownWrite).await?;
        self.mark_write_closed();
        debug!(conn = self.inner.id, "已发送写关闭");
        Ok(())
    }

    /// 完整关闭连接并释放底层句柄。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 立即标记读写两个方向关闭，之后不会有新的 IO 开始；
    /// 2. 发送关闭请求；失败（例如对端已先行离开）时直接释放句柄；
    /// 3. 若没有其他任务正在 `read`，尽力读取一次对端回应并忽略任何错误，
    ///    流结束与回应同样说明对端已确认或已离开；有读任务在途时由它消费回应；
    /// 4. 释放底层句柄，整个连接生命周期内只释放一次。
    ///
    /// ## 契约（What）
    /// - 可重复调用；句柄已释放后再次调用返回 `Ok(())`；
    /// - 在任何阶段被取消都不会让句柄滞留：读半部被立即丢弃，写半部当场拿得到就交给后台任务拆除，
    ///   正被其他任务持有时由后台任务在锁释放后拆除；
    /// - 仅在释放底层句柄本身失败时返回错误，此时句柄同样已被丢弃。
    pub async fn close(&self) -> Result<(), HvsockError> {
        match self.inner.reader.try_lock() {
            Ok(mut side) => self.close_with_reader(Some(&mut *side)).await,
            Err(_) => self.close_with_reader(None).await,
        }
    }

    /// 按方向关闭。
    pub async fn shutdown(&self, direction: ShutdownDirection) -> Result<(), HvsockError> {
        match direction {
            ShutdownDirection::Read => self.close_read().await,
            ShutdownDirection::Write => self.close_write().await,
            ShutdownDirection::Both => self.close().await,
        }
    }

    async fn write_message(&self, payload: &[u8]) -> Result<(), HvsockError> {
        let mut writer = self.inner.writer.lock().await;
        // 在写锁内复查：写关闭控制报文一旦写出，其后不得再出现数据消息。
        if self.is_write_closed() {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Write));
        }
        let header = Header::Data(payload.len() as u32).encode();
        let mut unit = WriteUnit::new(
            &mut *writer,
            &self.inner.write_closed,
            HEADER_LEN + payload.len(),
        );
        let result = async {
            unit.write(&header).await?;
            unit.write(payload).await?;
            unit.flush().await
        }
        .await;
        drop(unit);
        if let Err(err) = result {
            self.mark_write_closed();
            return Err(err);
        }
        trace!(conn = self.inner.id, len = payload.len(), "写出数据消息");
        Ok(())
    }

    /// `close` 与读路径中的对端关闭处理共用的关闭流程。
    ///
    /// 读路径持有读锁调用本函数，回应读取直接复用该读半部；锁顺序始终是先读锁后写锁。
    async fn close_with_reader(&self, side: Option<&mut ReadSide<S>>) -> Result<(), HvsockError> {
        self.mark_read_closed();
        self.mark_write_closed();
        let mut closing = Closing {
            inner: &self.inner,
            side,
            finished: false,
        };

        let sent = {
            let mut writer = self.inner.writer.lock().await;
            write_control(&mut *writer, &self.inner.write_closed, Control::Close).await
        };
        match sent {
            Ok(()) => {
                debug!(conn = self.inner.id, "已发送关闭请求");
                match closing.side.as_deref_mut() {
                    Some(side) => await_close_reply(side).await,
                    None => debug!(conn = self.inner.id, "读任务在途，由其消费对端回应"),
                }
            }
            Err(err) => {
                debug!(conn = self.inner.id, error = %err, "发送关闭请求失败，直接释放");
            }
        }
        closing.release().await
    }
}

/// 一次关闭流程的释放守卫。
///
/// 流程正常走完时由 [`Closing::release`] 拆除写半部；在任何 await 点被取消时，
/// `Drop` 同步丢弃读半部并标记已释放，写半部能立即拿到就当场交出，拿不到就交给后台任务。
struct Closing<'a, S: RawStream> {
    inner: &'a Arc<ConnInner<S>>,
    side: Option<&'a mut ReadSide<S>>,
    finished: bool,
}

impl<S: RawStream> Closing<'_, S> {
    async fn release(mut self) -> Result<(), HvsockError> {
        if let Some(side) = self.side.as_deref_mut() {
            side.drop_half();
        }
        if self.inner.released.swap(true, Ordering::AcqRel) {
            self.finished = true;
            return Ok(());
        }
        let half = self.inner.writer.lock().await.take();
        // 写半部已移出，此后即使取消也只是丢弃局部变量。
        self.finished = true;
        debug!(conn = self.inner.id, "释放底层句柄");
        match half {
            Some(mut half) => half
                .shutdown()
                .await
                .map_err(|err| map_io_error(error::CLOSE, err)),
            None => Ok(()),
        }
    }
}

impl<S: RawStream> Drop for Closing<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(side) = self.side.as_deref_mut() {
            side.drop_half();
        }
        self.inner.released.store(true, Ordering::Release);
        debug!(conn = self.inner.id, "关闭流程被取消，直接拆除底层句柄");

        let runtime = Handle::try_current().ok();
        match self.inner.writer.try_lock() {
            Ok(mut writer) => {
                if let (Some(mut half), Some(runtime)) = (writer.take(), runtime) {
                    runtime.spawn(async move {
                        let _ = half.shutdown().await;
                    });
                }
            }
            Err(_) => {
                if let Some(runtime) = runtime {
                    let inner = Arc::clone(self.inner);
                    runtime.spawn(async move {
                        let half = inner.writer.lock().await.take();
                        if let Some(mut half) = half {
                            let _ = half.shutdown().await;
                        }
                    });
                }
            }
        }
    }
}

/// 一个线上单元（报文头及其负载，或单独的控制报文头）的写出守卫。
///
/// 单元已有字节上线但未写完时被丢弃（取消或出错），线上就留下了半条消息：
/// 写方向随即致命关闭并丢弃写半部，之后不会再有任何字节跟在残缺单元后面。
/// 一个字节都没写出时线上仍然完整，守卫不做任何事。
struct WriteUnit<'a, S> {
    writer: &'a mut Option<WriteHalf<S>>,
    write_closed: &'a AtomicBool,
    len: usize,
    sent: usize,
}

impl<'a, S: RawStream> WriteUnit<'a, S> {
    fn new(writer: &'a mut Option<WriteHalf<S>>, write_closed: &'a AtomicBool, len: usize) -> Self {
        Self {
            writer,
            write_closed,
            len,
            sent: 0,
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), HvsockError> {
        let Some(half) = self.writer.as_mut() else {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Both));
        };
        let mut written = 0;
        while written < bytes.len() {
            match half.write(&bytes[written..]).await {
                Ok(0) => {
                    return Err(HvsockError::ShortWrite {
                        expected: bytes.len(),
                        written,
                    });
                }
                Ok(n) => {
                    written += n;
                    self.sent += n;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(error::WRITE, err)),
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), HvsockError> {
        let Some(half) = self.writer.as_mut() else {
            return Err(HvsockError::AlreadyClosed(ShutdownDirection::Both));
        };
        half.flush()
            .await
            .map_err(|err| map_io_error(error::WRITE, err))
    }
}

impl<S> Drop for WriteUnit<'_, S> {
    fn drop(&mut self) {
        if self.sent > 0 && self.sent < self.len {
            self.write_closed.store(true, Ordering::Release);
            self.writer.take();
        }
    }
}

async fn read_header<S: RawStream>(side: &mut ReadSide<S>) -> Result<Option<Header>, HvsockError> {
    let ReadSide {
        half,
        header,
        filled,
        ..
    } = side;
    let Some(half) = half.as_mut() else {
        return Ok(None);
    };
    // 单次 `read` 可被安全取消；已读到的字节累积在 `ReadSide` 中。
    while *filled < HEADER_LEN {
        let n = half
            .read(&mut header[*filled..])
            .await
            .map_err(|err| map_io_error(error::READ, err))?;
        if n == 0 {
            return Err(if *filled == 0 {
                unexpected_eof(error::READ, "等待报文头时原始流结束")
            } else {
                HvsockError::MalformedHeader { received: *filled }
            });
        }
        *filled += n;
    }
    *filled = 0;
    Ok(Some(Header::decode(*header)))
}

async fn write_control<S: RawStream>(
    writer: &mut Option<WriteHalf<S>>,
    write_closed: &AtomicBool,
    control: Control,
) -> Result<(), HvsockError> {
    let mut unit = WriteUnit::new(writer, write_closed, HEADER_LEN);
    unit.write(&control.encode()).await?;
    unit.flush().await
}

async fn await_close_reply<S: RawStream>(side: &mut ReadSide<S>) {
    let Some(half) = side.half.as_mut() else {
        return;
    };
    let mut reply = [0u8; HEADER_LEN];
    // 回应、流结束或错误都可接受。
    let _ = half.read(&mut reply).await;
}
