use std::io;

use hvsock_transport::ShutdownDirection;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "hvsock.framed.connect_failed",
    message: "hvsock connect",
};
pub(crate) const LISTEN: OperationKind = OperationKind {
    code: "hvsock.framed.listen_failed",
    message: "hvsock listen",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "hvsock.framed.accept_failed",
    message: "hvsock accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "hvsock.framed.read_failed",
    message: "hvsock read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "hvsock.framed.write_failed",
    message: "hvsock write",
};
pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "hvsock.framed.close_failed",
    message: "hvsock close",
};
pub(crate) const LISTENER_CLOSE: OperationKind = OperationKind {
    code: "hvsock.framed.listener_close_failed",
    message: "hvsock listener close",
};

const ALREADY_CLOSED_CODE: &str = "hvsock.framed.already_closed";
const MALFORMED_HEADER_CODE: &str = "hvsock.framed.malformed_header";
const SHORT_WRITE_CODE: &str = "hvsock.framed.short_write";
const INVALID_CONFIG_CODE: &str = "hvsock.framed.invalid_config";

/// 分帧连接的统一错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“方向已关闭”“报文头截断”“写入不足”“底层传输失败”四类失败显式区分，
///   调用方据此决定是停止使用连接还是升级为完整关闭；
/// - 每个变体都能给出稳定错误码（[`HvsockError::code`]），便于日志与指标聚合。
///
/// ## 契约（What）
/// - `AlreadyClosed`：在已关闭的方向上发起操作；`Both` 表示底层句柄已释放；
/// - `MalformedHeader`：读取报文头时流在 1~3 字节处结束；
/// - `ShortWrite`：报文头或负载未能完整写出，或调用级 `write_all` 只写出部分字节；
/// - `Transport`：底层读写、拨号、接受或释放失败，原始 `io::Error` 保留在 `source` 中；
/// - `InvalidConfig`：配置越界。
///
/// ## 注意事项（Trade-offs）
/// - 分帧层从不对 IO 失败做内部重试；是否重试是调用方策略。
#[derive(Debug, Error)]
pub enum HvsockError {
    /// 目标方向已关闭。
    #[error("hvsock 连接的 {0} 方向已关闭")]
    AlreadyClosed(ShutdownDirection),
    /// 报文头不足 4 字节即遇到流结束。
    #[error("hvsock 报文头截断：仅收到 {received} 字节")]
    MalformedHeader { received: usize },
    /// 写出字节数少于要求。
    #[error("hvsock 写入不完整：期望 {expected} 字节，实际 {written} 字节")]
    ShortWrite { expected: usize, written: usize },
    /// 底层传输失败。
    #[error("{} 失败: {source}", .kind.message)]
    Transport {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 配置不合法。
    #[error("hvsock 分帧配置无效: {0}")]
    InvalidConfig(String),
}

impl HvsockError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            HvsockError::AlreadyClosed(_) => ALREADY_CLOSED_CODE,
            HvsockError::MalformedHeader { .. } => MALFORMED_HEADER_CODE,
            HvsockError::ShortWrite { .. } => SHORT_WRITE_CODE,
            HvsockError::Transport { kind, .. } => kind.code,
            HvsockError::InvalidConfig(_) => INVALID_CONFIG_CODE,
        }
    }
}

/// 将 IO 错误映射为分帧层错误。
pub(crate) fn map_io_error(kind: OperationKind, source: io::Error) -> HvsockError {
    HvsockError::Transport { kind, source }
}

/// 原始流在期望更多字节时提前结束。
pub(crate) fn unexpected_eof(kind: OperationKind, context: &'static str) -> HvsockError {
    map_io_error(kind, io::Error::new(io::ErrorKind::UnexpectedEof, context))
}

impl From<HvsockError> for io::Error {
    fn from(err: HvsockError) -> Self {
        let kind = match err {
            HvsockError::Transport { source, .. } => return source,
            HvsockError::AlreadyClosed(ShutdownDirection::Write) => io::ErrorKind::BrokenPipe,
            HvsockError::AlreadyClosed(_) => io::ErrorKind::NotConnected,
            HvsockError::MalformedHeader { .. } => io::ErrorKind::InvalidData,
            HvsockError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            HvsockError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}
