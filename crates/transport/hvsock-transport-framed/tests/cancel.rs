//! 被取消的读写不得破坏线上分帧。
//!
//! # 教案式说明
//! - **Why**：调用方常用 `tokio::time::timeout` 或 `select!` 丢弃在途 Future，
//!   丢弃点可能落在报文头与负载之间；此时继续写入会让后续报文头落进已声明的负载里。
//! - **How**：小容量管道且对端不读，让写入必然阻塞在消息中途，再用超时丢弃它。
//! - **What**：写方向致命关闭且线上只剩残缺消息本身；被取消的读从断点继续。

use std::time::Duration;

use hvsock_transport_framed::{
    ConnState, FramingConfig, HvsockAddr, HvsockConn, HvsockError, ShutdownDirection,
    frame::{HEADER_LEN, Header},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::timeout,
};

const STALL: Duration = Duration::from_millis(50);

fn conn_and_raw(capacity: usize) -> (HvsockConn<DuplexStream>, DuplexStream) {
    let (local, remote) = tokio::io::duplex(capacity);
    let conn = HvsockConn::new(
        local,
        HvsockAddr::UNSPECIFIED,
        HvsockAddr::UNSPECIFIED,
        FramingConfig::default(),
    )
    .expect("default config is valid");
    (conn, remote)
}

/// 4000 字节的消息只写出 1020 字节负载时被取消：写方向关闭，写关闭哨兵不会落进负载。
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_write_mid_message_closes_write_side() {
    let (conn, mut raw) = conn_and_raw(1024);

    let cancelled = timeout(STALL, conn.write(&[7u8; 4000])).await;
    assert!(cancelled.is_err(), "write should stall on a full pipe");
    assert_eq!(conn.state(), ConnState::WriteClosed);

    let err = conn.close_write().await.expect_err("write side is gone");
    assert!(matches!(
        err,
        HvsockError::AlreadyClosed(ShutdownDirection::Write)
    ));
    assert!(matches!(
        conn.write(b"more").await,
        Err(HvsockError::AlreadyClosed(ShutdownDirection::Write))
    ));

    drop(conn);
    let mut wire = Vec::new();
    raw.read_to_end(&mut wire).await.expect("drain");
    let header: [u8; HEADER_LEN] = wire[..HEADER_LEN].try_into().expect("header bytes");
    assert_eq!(Header::decode(header), Header::Data(4000));
    let payload = &wire[HEADER_LEN..];
    assert!(payload.len() < 4000, "the message was cut short");
    assert!(
        payload.iter().all(|&byte| byte == 7),
        "foreign bytes inside the declared payload"
    );
}

/// 等待写锁时被取消的 `close_write` 没有写出任何字节，状态不变且可以重试。
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_close_write_while_waiting_for_lock_changes_nothing() {
    let (conn, mut raw) = conn_and_raw(64 * 1024);
    let blocker = {
        let conn = conn.clone();
        // 占住写锁的长写入：对端不读时阻塞在消息中途。
        tokio::spawn(async move { conn.write(&vec![1u8; 128 * 1024]).await })
    };
    tokio::time::sleep(STALL).await;

    let cancelled = timeout(STALL, conn.close_write()).await;
    assert!(cancelled.is_err(), "close_write waits for the write lock");

    let mut sink = vec![0u8; 256 * 1024];
    let reader = tokio::spawn(async move {
        let mut total = 0;
        loop {
            match raw.read(&mut sink).await {
                Ok(0) | Err(_) => break total,
                Ok(n) => total += n,
            }
        }
    });
    assert_eq!(blocker.await.expect("writer task").expect("write"), 128 * 1024);
    assert_eq!(conn.state(), ConnState::Open);
    conn.close_write().await.expect("close_write after cancelled attempt");
    drop(conn);
    let total = reader.await.expect("reader task");
    // 四条 32 KiB 消息加一条写关闭。
    assert_eq!(total, 4 * (HEADER_LEN + 32 * 1024) + HEADER_LEN);
}

/// 报文头读到一半时被取消，剩余字节到达后下一次 `read` 仍能对齐消息。
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_read_resumes_mid_header() {
    let (conn, mut raw) = conn_and_raw(64 * 1024);
    raw.write_all(&[5, 0]).await.expect("first half of header");

    let mut buf = [0u8; 16];
    let cancelled = timeout(STALL, conn.read(&mut buf)).await;
    assert!(cancelled.is_err(), "read should wait for the rest of the header");

    raw.write_all(&[0, 0, b'h', b'e', b'l', b'l', b'o'])
        .await
        .expect("rest of message");
    assert_eq!(conn.read(&mut buf).await.expect("read"), 5);
    assert_eq!(&buf[..5], b"hello");
    assert_eq!(conn.state(), ConnState::Open);
}
