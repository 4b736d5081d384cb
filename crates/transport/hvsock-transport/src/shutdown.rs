/// 连接关闭方向。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 底层 Hyper-V 套接字只支持整体拆除，半关闭语义由分帧层以控制报文模拟；
///   该枚举让调用方以与 TCP 相同的词汇声明关闭意图。
///
/// ## 契约（What）
/// - `Read`：不再接收数据，通知对端停止发送；
/// - `Write`：不再发送数据，对端读到流结束；
/// - `Both`：完整关闭握手并释放底层句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownDirection {
    /// 关闭读半部。
    Read,
    /// 关闭写半部。
    Write,
    /// 同时关闭读写半部。
    Both,
}

impl core::fmt::Display for ShutdownDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ShutdownDirection::Read => "read",
            ShutdownDirection::Write => "write",
            ShutdownDirection::Both => "both",
        })
    }
}
