//! 切块透明性：任意长度的调用级写入在线上被切成不超过上限的消息，接收端看到的字节完全一致。

use hvsock_transport_framed::{
    FramingConfig, HvsockAddr, HvsockConn,
    frame::{Control, Header, message_count},
};
use proptest::{collection::vec, prelude::*};
use tokio::io::{AsyncReadExt, DuplexStream};

fn wrap(stream: DuplexStream, config: FramingConfig) -> HvsockConn<DuplexStream> {
    HvsockConn::new(
        stream,
        HvsockAddr::UNSPECIFIED,
        HvsockAddr::UNSPECIFIED,
        config,
    )
    .expect("config in range")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// 线上消息数量、单条长度与负载内容均符合切块规则。
    #[test]
    fn writes_are_split_at_the_configured_size(
        max in 1u32..=64,
        data in vec(any::<u8>(), 0..512),
    ) {
        let (wire, payloads) = runtime().block_on(async {
            let (local, mut raw) = tokio::io::duplex(64 * 1024);
            let conn = wrap(local, FramingConfig::new().with_max_message_size(max));
            conn.write_all(&data).await.expect("write_all");
            conn.close_write().await.expect("close_write");

            let mut payloads = Vec::new();
            let mut wire = Vec::new();
            loop {
                let mut header = [0u8; 4];
                raw.read_exact(&mut header).await.expect("header");
                match Header::decode(header) {
                    Header::Control(Control::ShutdownWrite) => break,
                    Header::Control(other) => panic!("unexpected control {other:?}"),
                    Header::Data(len) => {
                        let mut payload = vec![0u8; len as usize];
                        raw.read_exact(&mut payload).await.expect("payload");
                        wire.push(len);
                        payloads.extend_from_slice(&payload);
                    }
                }
            }
            (wire, payloads)
        });

        prop_assert_eq!(wire.len(), message_count(data.len(), max));
        prop_assert!(wire.iter().all(|&len| len <= max));
        prop_assert_eq!(payloads, data);
    }

    /// 两个配置不同的分帧连接之间，接收端读到的字节与写入完全一致。
    #[test]
    fn receiver_sees_the_written_bytes(
        writer_max in 1u32..=64,
        reader_max in 1u32..=64,
        data in vec(any::<u8>(), 0..512),
        read_size in 1usize..96,
    ) {
        let received = runtime().block_on(async {
            let (left, right) = tokio::io::duplex(64 * 1024);
            let writer = wrap(left, FramingConfig::new().with_max_message_size(writer_max));
            let reader = wrap(right, FramingConfig::new().with_max_message_size(reader_max));

            writer.write_all(&data).await.expect("write_all");
            writer.close_write().await.expect("close_write");

            let mut received = Vec::new();
            let mut buf = vec![0u8; read_size];
            loop {
                let n = reader.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        prop_assert_eq!(received, data);
    }
}
