#![no_main]

use hvsock_transport_framed::{FramingConfig, HvsockAddr, HvsockConn};
use libfuzzer_sys::fuzz_target;
use tokio::io::AsyncWriteExt;

/// 把任意字节当作对端线上内容喂给读路径。
///
/// - **Why**：报文头解析与负载边界处理直接面对不可信输入，截断、超长长度与控制码混排都不能导致 panic；
/// - **How**：对端写完字节后立即断开，读循环因此必然以 `Ok(0)` 或错误结束；
/// - **What**：读出的字节数不超过输入中的负载总量，且读方向结束后状态保持关闭。
fuzz_target!(|data: (u8, Vec<u8>)| {
    let (read_size, wire) = data;
    let read_size = usize::from(read_size).max(1);
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    runtime.block_on(async move {
        let capacity = wire.len().max(1);
        let (local, mut remote) = tokio::io::duplex(capacity);
        let conn = match HvsockConn::new(
            local,
            HvsockAddr::UNSPECIFIED,
            HvsockAddr::UNSPECIFIED,
            FramingConfig::default(),
        ) {
            Ok(conn) => conn,
            Err(_) => return,
        };
        if remote.write_all(&wire).await.is_err() {
            return;
        }
        // 缓冲字节仍可读出，随后读到流结束；关闭回应的写入只会失败，不会阻塞。
        drop(remote);

        let payload_upper_bound = wire.len();
        let mut total = 0usize;
        let mut buf = vec![0u8; read_size];
        loop {
            match conn.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    assert!(n <= read_size);
                    total += n;
                }
            }
        }
        assert!(total <= payload_upper_bound);
        assert!(conn.is_read_closed());
    });
});
