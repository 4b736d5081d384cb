//! 回显演示：同一进程内启动服务端与客户端，走完“写入 → 写关闭 → 回显 → 告别 → 关闭”的全过程。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=hvsock_transport_framed=debug cargo run -p hvsock-echo -- "hello hvsock"
//! ```
//! - 第一个参数为客户端发送的消息，缺省时使用内置问候语；
//! - `RUST_LOG` 控制日志级别，未设置时为 `info`。
//!
//! # 设计要点（Why）
//! - 服务端读到流结束才发送告别语，直观展示“对端写关闭后本端仍可写”的半关闭语义；
//! - 服务端主动 `close`，客户端在 `read` 中回应关闭握手后读到流结束，随后的 `close` 只是无操作。

use anyhow::{Context, Result};
use hvsock_transport::{Guid, MemoryAcceptor, MemoryTransport};
use hvsock_transport_framed::{HvsockAddr, HvsockConn, HvsockListener};
use tokio::io::DuplexStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 约定俗成的回显服务 ID。
const ECHO_SERVICE: Guid = Guid::from_fields(
    0x3049_197c,
    0x9a4e,
    0x4fbf,
    [0x93, 0x67, 0x97, 0xf7, 0x92, 0xf1, 0x69, 0x94],
);

const GOODBYE: &[u8] = b"Bye!";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Hello from hvsock-echo".to_owned());

    let transport = MemoryTransport::new();
    let listener = HvsockListener::bind(&transport, HvsockAddr::new(Guid::WILDCARD, ECHO_SERVICE))
        .await
        .context("绑定回显服务失败")?;
    info!(addr = %listener.local_addr(), "回显服务开始监听");

    let server = tokio::spawn(serve_one(listener));
    let reply = run_client(&transport, message.as_bytes()).await?;
    server.await.context("服务端任务异常退出")??;

    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

async fn serve_one(listener: HvsockListener<MemoryAcceptor>) -> Result<()> {
    let (conn, peer) = listener.accept().await.context("接受连接失败")?;
    info!(%peer, "接受客户端连接");

    let mut buf = [0u8; 4096];
    let mut echoed = 0usize;
    loop {
        let n = conn.read(&mut buf).await.context("服务端读取失败")?;
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n]).await.context("回显写入失败")?;
        echoed += n;
    }
    info!(echoed, "客户端写关闭，发送告别语");

    conn.write_all(GOODBYE).await.context("发送告别语失败")?;
    conn.close().await.context("服务端关闭失败")?;
    listener.close().context("停止监听失败")?;
    Ok(())
}

async fn run_client(transport: &MemoryTransport, message: &[u8]) -> Result<Vec<u8>> {
    let target = HvsockAddr::new(Guid::LOOPBACK, ECHO_SERVICE);
    let conn: HvsockConn<DuplexStream> = hvsock_transport_framed::dial(transport, target)
        .await
        .with_context(|| format!("拨号 {target} 失败"))?;

    conn.write_all(message).await.context("客户端写入失败")?;
    conn.close_write().await.context("客户端写关闭失败")?;

    let mut reply = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = conn.read(&mut buf).await.context("客户端读取失败")?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..n]);
    }
    conn.close().await.context("客户端关闭失败")?;
    info!(bytes = reply.len(), state = ?conn.state(), "客户端完成");
    Ok(reply)
}
