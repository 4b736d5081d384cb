//! 线上分帧格式。
//!
//! # 模块定位（Why）
//! - 底层 Hyper-V 套接字只能整体拆除，半关闭必须以带内控制报文表达；
//! - 每个单元以 4 字节小端报文头开始：数值落在数据长度区间时其后紧跟等长负载，
//!   等于三个保留哨兵之一时为无负载的控制报文。
//!
//! # 格式（What）
//! ```text
//! Message   := Header Payload?
//! Header    := uint32 little-endian
//! Payload   := Header.value bytes，仅当 Header 为数据长度时出现
//! CtrlCodes := SHUTDOWN_RD = 0xDEADBEEF | SHUTDOWN_WR = 0xBEEFDEAD | CLOSE = 0xDEADDEAD
//! ```
//!
//! # 注意事项（Trade-offs）
//! - 控制码远离任何合法长度，配置上限 [`MAX_MESSAGE_SIZE_LIMIT`] 也由编译期断言约束在其下方；
//! - 非控制码一律按数据长度解释（包括超过本端配置上限的值），读取路径从不按该值预分配内存。

use bytes::{Buf, BufMut};

/// 报文头字节数。
pub const HEADER_LEN: usize = 4;

/// 单条数据消息的默认最大负载。
pub const MAX_MSG_SIZE: u32 = 32 * 1024;

/// 可配置的负载上限，远低于保留控制码。
pub const MAX_MESSAGE_SIZE_LIMIT: u32 = 16 * 1024 * 1024;

/// 对端声明不再接收数据。
pub const SHUTDOWN_RD: u32 = 0xDEAD_BEEF;

/// 对端声明不再发送数据。
pub const SHUTDOWN_WR: u32 = 0xBEEF_DEAD;

/// 对端发起完整关闭。
pub const CLOSE: u32 = 0xDEAD_DEAD;

const MIN_CONTROL_CODE: u32 = min_u32(SHUTDOWN_RD, min_u32(SHUTDOWN_WR, CLOSE));

const fn min_u32(a: u32, b: u32) -> u32 {
    if a < b { a } else { b }
}

const _: () = assert!(MAX_MSG_SIZE <= MAX_MESSAGE_SIZE_LIMIT);
const _: () = assert!(MAX_MESSAGE_SIZE_LIMIT < MIN_CONTROL_CODE);

/// 控制报文。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    /// 发送方不再接收数据。
    ShutdownRead,
    /// 发送方不再发送数据。
    ShutdownWrite,
    /// 发送方终止连接，接收方需回应一条 `Close`。
    Close,
}

impl Control {
    /// 保留的线上数值。
    pub const fn code(self) -> u32 {
        match self {
            Control::ShutdownRead => SHUTDOWN_RD,
            Control::ShutdownWrite => SHUTDOWN_WR,
            Control::Close => CLOSE,
        }
    }

    /// 编码为独立的控制报文头。
    pub fn encode(self) -> [u8; HEADER_LEN] {
        Header::Control(self).encode()
    }

    const fn from_code(code: u32) -> Option<Self> {
        match code {
            SHUTDOWN_RD => Some(Control::ShutdownRead),
            SHUTDOWN_WR => Some(Control::ShutdownWrite),
            CLOSE => Some(Control::Close),
            _ => None,
        }
    }
}

/// 解码后的报文头。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Header {
    /// 数据长度头，其后紧跟同样字节数的负载。
    Data(u32),
    /// 无负载的控制报文。
    Control(Control),
}

impl Header {
    /// 按保留哨兵区分控制报文与数据长度。
    pub fn decode(raw: [u8; HEADER_LEN]) -> Self {
        let value = (&raw[..]).get_u32_le();
        match Control::from_code(value) {
            Some(control) => Header::Control(control),
            None => Header::Data(value),
        }
    }

    /// 编码为小端报文头。
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let value = match self {
            Header::Data(len) => len,
            Header::Control(control) => control.code(),
        };
        let mut raw = [0u8; HEADER_LEN];
        (&mut raw[..]).put_u32_le(value);
        raw
    }

    /// 数据长度头对应的负载字节数。
    pub fn payload_len(self) -> usize {
        match self {
            Header::Data(len) => len as usize,
            Header::Control(_) => 0,
        }
    }
}

/// 一次调用级写入会被切分成的线上消息数量（空写入仍产生一条零长消息）。
pub fn message_count(len: usize, max_message_size: u32) -> usize {
    len.div_ceil(max_message_size as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_codes_sit_above_every_data_length() {
        for code in [SHUTDOWN_RD, SHUTDOWN_WR, CLOSE] {
            assert!(MAX_MSG_SIZE < code);
            assert!(MAX_MESSAGE_SIZE_LIMIT < code);
        }
    }

    #[test]
    fn control_headers_use_little_endian_sentinels() {
        assert_eq!(Control::ShutdownWrite.encode(), [0xAD, 0xDE, 0xEF, 0xBE]);
        assert_eq!(Control::ShutdownRead.encode(), [0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(Control::Close.encode(), [0xAD, 0xDE, 0xAD, 0xDE]);
        assert_eq!(
            Header::decode([0xAD, 0xDE, 0xEF, 0xBE]),
            Header::Control(Control::ShutdownWrite)
        );
    }

    #[test]
    fn data_header_encodes_length() {
        assert_eq!(Header::Data(5).encode(), [0x05, 0x00, 0x00, 0x00]);
        assert_eq!(Header::Data(MAX_MSG_SIZE).encode(), [0x00, 0x80, 0x00, 0x00]);
        assert_eq!(Header::decode([0, 0, 0, 0]), Header::Data(0));
        assert_eq!(Header::decode([0x05, 0, 0, 0]).payload_len(), 5);
    }

    #[test]
    fn non_control_values_decode_as_data() {
        let value = MAX_MSG_SIZE + 1;
        assert_eq!(Header::decode(value.to_le_bytes()), Header::Data(value));
        assert_eq!(Header::decode(u32::MAX.to_le_bytes()), Header::Data(u32::MAX));
    }

    #[test]
    fn message_count_matches_chunking() {
        assert_eq!(message_count(0, MAX_MSG_SIZE), 1);
        assert_eq!(message_count(1, MAX_MSG_SIZE), 1);
        assert_eq!(message_count(MAX_MSG_SIZE as usize, MAX_MSG_SIZE), 1);
        assert_eq!(message_count(MAX_MSG_SIZE as usize + 1, MAX_MSG_SIZE), 2);
        assert_eq!(message_count(40_000, MAX_MSG_SIZE), 2);
    }
}
