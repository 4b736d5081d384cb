use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Hyper-V 套接字使用的 128 位标识符（VM ID 与服务 ID 共用同一表示）。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - Hyper-V 套接字以 GUID 而非 IP/端口寻址，`Guid` 为连接元数据提供不可变、可比较的值类型；
/// - 文本形式与 Windows 工具链保持一致，便于日志、配置与 `hvc`/PowerShell 输出互相对照。
///
/// ## 契约（What）
/// - 内部字节布局遵循 Windows `GUID` 约定：前三组（`Data1: u32`、`Data2: u16`、`Data3: u16`）
///   以小端存储，其余 8 字节按书写顺序存放；
/// - `Display` 输出小写 `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`；
/// - `FromStr` 是 `Display` 的严格逆运算：长度必须为 36、连字符位置固定、其余为十六进制字符（大小写均可）。
///
/// ## 注意事项（Trade-offs）
/// - 不接受花括号包裹或无连字符的写法，避免“宽松解析”导致同一地址出现多种表示。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid([u8; 16]);

const GUID_TEXT_LEN: usize = 36;
const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

impl Guid {
    /// 全零标识。
    pub const ZERO: Guid = Guid([0; 16]);
    /// 通配标识，监听时表示接受任意分区的连接。
    pub const WILDCARD: Guid = Guid::ZERO;
    /// 广播标识（所有位为 1）。
    pub const BROADCAST: Guid = Guid([0xff; 16]);
    /// 当前分区的所有子分区。
    pub const CHILDREN: Guid = Guid::from_fields(
        0x90db_8b89,
        0x0d35,
        0x4f79,
        [0x8c, 0xe9, 0x49, 0xea, 0x0a, 0xc8, 0xb7, 0xcd],
    );
    /// 回环标识，连接到同一分区内的服务。
    pub const LOOPBACK: Guid = Guid::from_fields(
        0xe0e1_6197,
        0xdd56,
        0x4a10,
        [0x91, 0x95, 0x5e, 0xe7, 0xa1, 0x55, 0xa8, 0x38],
    );
    /// 父分区（宿主机）标识。
    pub const PARENT: Guid = Guid::from_fields(
        0xa42e_7cda,
        0xd03f,
        0x480c,
        [0x9c, 0xc2, 0xa4, 0xde, 0x20, 0xab, 0xb8, 0x78],
    );

    /// 以线上字节布局构造。
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// 以 Windows `GUID` 结构的四个字段构造。
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let d1 = data1.to_le_bytes();
        let d2 = data2.to_le_bytes();
        let d3 = data3.to_le_bytes();
        Self([
            d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], data4[0], data4[1], data4[2],
            data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }

    /// 返回线上字节布局。
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// 是否为全零（通配）标识。
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6], g[8], g[9], g[10], g[11], g[12], g[13],
            g[14], g[15]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl FromStr for Guid {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.as_bytes();
        if text.len() != GUID_TEXT_LEN {
            return Err(AddrParseError::GuidLength { len: text.len() });
        }
        for pos in DASH_POSITIONS {
            if text[pos] != b'-' {
                return Err(AddrParseError::GuidDash { pos });
            }
        }

        // 去掉连字符后剩余 32 个十六进制字符，按书写顺序解码为 16 字节。
        let mut digits = [0u8; 32];
        let mut cursor = 0;
        for (idx, byte) in text.iter().enumerate() {
            if DASH_POSITIONS.contains(&idx) {
                continue;
            }
            digits[cursor] = *byte;
            cursor += 1;
        }
        let mut written = [0u8; 16];
        hex::decode_to_slice(digits, &mut written).map_err(|_| AddrParseError::GuidDigit)?;

        let w = written;
        Ok(Guid([
            w[3], w[2], w[1], w[0], w[5], w[4], w[7], w[6], w[8], w[9], w[10], w[11], w[12], w[13],
            w[14], w[15],
        ]))
    }
}

/// Hyper-V 套接字端点地址：(VM ID, 服务 ID)。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同时充当拨号目标与监听绑定地址；
/// - 仅作为连接元数据，不参与分帧逻辑。
///
/// ## 契约（What）
/// - `Display` 输出 `"<vm_id>:<service_id>"`，`FromStr` 为其逆运算；
/// - `network()` 固定返回网络族标签 `"hvsock"`；
/// - 构造后不可变。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HvsockAddr {
    vm_id: Guid,
    service_id: Guid,
}

impl HvsockAddr {
    /// 未指定地址，拨号端本地地址使用该值。
    pub const UNSPECIFIED: HvsockAddr = HvsockAddr::new(Guid::ZERO, Guid::ZERO);

    /// 由 VM ID 与服务 ID 组合地址。
    pub const fn new(vm_id: Guid, service_id: Guid) -> Self {
        Self { vm_id, service_id }
    }

    /// 分区（虚拟机）标识。
    pub const fn vm_id(&self) -> Guid {
        self.vm_id
    }

    /// 服务标识，语义上相当于端口。
    pub const fn service_id(&self) -> Guid {
        self.service_id
    }

    /// 网络族标签。
    pub const fn network(&self) -> &'static str {
        "hvsock"
    }
}

impl fmt::Display for HvsockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vm_id, self.service_id)
    }
}

impl FromStr for HvsockAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vm_id, service_id) = s.split_once(':').ok_or(AddrParseError::MissingSeparator)?;
        Ok(Self::new(vm_id.parse()?, service_id.parse()?))
    }
}

/// 标识符或地址文本解析失败。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    /// 文本长度不是 36。
    #[error("GUID 文本长度应为 36，实际为 {len}")]
    GuidLength { len: usize },
    /// 连字符位置错误。
    #[error("GUID 文本第 {pos} 位应为连字符")]
    GuidDash { pos: usize },
    /// 出现非十六进制字符。
    #[error("GUID 文本包含非十六进制字符")]
    GuidDigit,
    /// 地址缺少 `:` 分隔符。
    #[error("hvsock 地址缺少 `vm_id:service_id` 分隔符")]
    MissingSeparator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_identifiers_render_canonically() {
        assert_eq!(Guid::ZERO.to_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(Guid::BROADCAST.to_string(), "ffffffff-ffff-ffff-ffff-ffffffffffff");
        assert_eq!(Guid::CHILDREN.to_string(), "90db8b89-0d35-4f79-8ce9-49ea0ac8b7cd");
        assert_eq!(Guid::LOOPBACK.to_string(), "e0e16197-dd56-4a10-9195-5ee7a155a838");
        assert_eq!(Guid::PARENT.to_string(), "a42e7cda-d03f-480c-9cc2-a4de20abb878");
        assert_eq!(Guid::WILDCARD, Guid::ZERO);
    }

    #[test]
    fn data1_is_stored_little_endian() {
        let guid: Guid = "90db8b89-0d35-4f79-8ce9-49ea0ac8b7cd".parse().expect("parse");
        assert_eq!(&guid.as_bytes()[..8], &[0x89, 0x8b, 0xdb, 0x90, 0x35, 0x0d, 0x79, 0x4f]);
        assert_eq!(guid, Guid::CHILDREN);
    }

    #[test]
    fn parse_accepts_uppercase_and_formats_lowercase() {
        let guid: Guid = "FFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF".parse().expect("parse");
        assert_eq!(guid, Guid::BROADCAST);
        let svc: Guid = "3049197C-9A4E-4FBF-9367-97F792F16994".parse().expect("parse");
        assert_eq!(svc.to_string(), "3049197c-9a4e-4fbf-9367-97f792f16994");
    }

    #[test]
    fn parse_rejects_malformed_text() {
        assert_eq!(
            "1234".parse::<Guid>(),
            Err(AddrParseError::GuidLength { len: 4 })
        );
        assert_eq!(
            "00000000_0000-0000-0000-000000000000".parse::<Guid>(),
            Err(AddrParseError::GuidDash { pos: 8 })
        );
        assert_eq!(
            "0000000g-0000-0000-0000-000000000000".parse::<Guid>(),
            Err(AddrParseError::GuidDigit)
        );
        assert!("{00000000-0000-0000-0000-0000000000}".parse::<Guid>().is_err());
    }

    #[test]
    fn address_text_round_trips() {
        let addr = HvsockAddr::new(Guid::LOOPBACK, Guid::PARENT);
        let text = addr.to_string();
        assert_eq!(
            text,
            "e0e16197-dd56-4a10-9195-5ee7a155a838:a42e7cda-d03f-480c-9cc2-a4de20abb878"
        );
        assert_eq!(text.parse::<HvsockAddr>(), Ok(addr));
        assert_eq!(addr.network(), "hvsock");
        assert_eq!(
            "e0e16197-dd56-4a10-9195-5ee7a155a838".parse::<HvsockAddr>(),
            Err(AddrParseError::MissingSeparator)
        );
    }

    mod props {
        use super::super::Guid;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_then_parse_is_identity(bytes in any::<[u8; 16]>()) {
                let guid = Guid::from_bytes(bytes);
                let parsed: Guid = guid.to_string().parse().expect("canonical text parses");
                prop_assert_eq!(parsed, guid);
            }
        }
    }
}
