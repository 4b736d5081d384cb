#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use hvsock_transport_framed::{
    ConnState, FramingConfig, HvsockAddr, HvsockConn, HvsockError,
    frame::{Control, HEADER_LEN, Header},
};
use libfuzzer_sys::fuzz_target;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// 分帧连接与原始对端之间的任意操作序列。
///
/// - **Why**：半关闭、完整关闭与读写交错的组合空间很大，手写用例难以覆盖“关闭后再读写”
///   “写到一半被取消”等路径；
/// - **How**：每个操作都套上短超时，管道写满时写入会阻塞在消息中途并被丢弃；对端只在 `PeerDrain`
///   时读取，读到的字节全部记录下来；
/// - **What**：状态只会单调推进，已关闭方向上的写入返回 `AlreadyClosed`；连接丢弃后对端读到流结束，
///   且记录的线上字节逐帧完整：负载中不混入其他字节，写关闭之后没有数据，完整关闭之后没有任何字节，
///   残缺消息只能出现在末尾。
#[derive(Debug, Arbitrary)]
struct ConnCase {
    max_message_size: u8,
    ops: Vec<ConnOp>,
}

#[derive(Debug, Arbitrary)]
enum ConnOp {
    Write { len: u16 },
    Read { len: u8 },
    CloseRead,
    CloseWrite,
    Close,
    PeerDrain { len: u16 },
    PeerSend(PeerFrame),
}

#[derive(Debug, Arbitrary)]
enum PeerFrame {
    Data { len: u8 },
    ShutdownRead,
    ShutdownWrite,
    Close,
    Raw(Vec<u8>),
}

impl PeerFrame {
    fn encode(&self) -> Vec<u8> {
        match self {
            PeerFrame::Data { len } => {
                let mut bytes = Header::Data(u32::from(*len)).encode().to_vec();
                bytes.resize(HEADER_LEN + usize::from(*len), 0xa5);
                bytes
            }
            PeerFrame::ShutdownRead => Control::ShutdownRead.encode().to_vec(),
            PeerFrame::ShutdownWrite => Control::ShutdownWrite.encode().to_vec(),
            PeerFrame::Close => Control::Close.encode().to_vec(),
            PeerFrame::Raw(bytes) => bytes.iter().copied().take(16).collect(),
        }
    }
}

const STEP: Duration = Duration::from_millis(5);
const FILL: u8 = 0x5a;

fn rank(state: ConnState) -> u8 {
    match state {
        ConnState::Open => 0,
        ConnState::ReadClosed | ConnState::WriteClosed => 1,
        ConnState::Closed => 2,
    }
}

/// 逐帧检查连接写出的全部字节。
fn assert_frames_intact(wire: &[u8], max: u32) {
    let mut rest = wire;
    let mut write_closed = false;
    while rest.len() >= HEADER_LEN {
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&rest[..HEADER_LEN]);
        rest = &rest[HEADER_LEN..];
        match Header::decode(raw) {
            Header::Data(len) => {
                assert!(!write_closed, "data message after shutdown-write");
                assert!(len <= max, "message of {len} bytes exceeds {max}");
                let len = len as usize;
                let (payload, tail) = rest.split_at(len.min(rest.len()));
                assert!(
                    payload.iter().all(|&byte| byte == FILL),
                    "foreign bytes inside a declared payload"
                );
                rest = tail;
            }
            Header::Control(Control::ShutdownWrite) => write_closed = true,
            Header::Control(Control::ShutdownRead) => {}
            Header::Control(Control::Close) => {
                assert!(rest.is_empty(), "{} bytes after close", rest.len());
            }
        }
    }
}

fuzz_target!(|case: ConnCase| {
    if case.ops.is_empty() || case.ops.len() > 64 {
        return;
    }
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    runtime.block_on(async move {
        let max = u32::from(case.max_message_size).max(1);
        let (local, mut raw) = tokio::io::duplex(4096);
        let Ok(conn) = HvsockConn::new(
            local,
            HvsockAddr::UNSPECIFIED,
            HvsockAddr::UNSPECIFIED,
            FramingConfig::new().with_max_message_size(max),
        ) else {
            return;
        };
        let mut rank_seen = 0u8;
        let mut wire = Vec::new();

        for op in case.ops {
            let was_write_closed = conn.is_write_closed();
            match op {
                ConnOp::Write { len } => {
                    let payload = vec![FILL; usize::from(len)];
                    if let Ok(result) = tokio::time::timeout(STEP, conn.write(&payload)).await {
                        if was_write_closed {
                            assert!(matches!(result, Err(HvsockError::AlreadyClosed(_))));
                        }
                    }
                }
                ConnOp::Read { len } => {
                    let mut buf = vec![0u8; usize::from(len)];
                    let _ = tokio::time::timeout(STEP, conn.read(&mut buf)).await;
                }
                ConnOp::CloseRead => {
                    let _ = tokio::time::timeout(STEP, conn.close_read()).await;
                }
                ConnOp::CloseWrite => {
                    let _ = tokio::time::timeout(STEP, conn.close_write()).await;
                }
                ConnOp::Close => {
                    let _ = tokio::time::timeout(STEP, conn.close()).await;
                    assert_eq!(conn.state(), ConnState::Closed);
                }
                ConnOp::PeerDrain { len } => {
                    let mut buf = vec![0u8; usize::from(len).max(1)];
                    if let Ok(Ok(n)) = tokio::time::timeout(STEP, raw.read(&mut buf)).await {
                        wire.extend_from_slice(&buf[..n]);
                    }
                }
                ConnOp::PeerSend(frame) => {
                    let _ = tokio::time::timeout(STEP, raw.write_all(&frame.encode())).await;
                }
            }

            let rank_now = rank(conn.state());
            assert!(rank_now >= rank_seen, "state regressed");
            rank_seen = rank_now;
        }

        drop(conn);
        let drained = tokio::time::timeout(Duration::from_secs(1), raw.read_to_end(&mut wire)).await;
        assert!(
            matches!(drained, Ok(Ok(_))),
            "peer never saw the stream end"
        );
        assert_frames_intact(&wire, max);
    });
});
