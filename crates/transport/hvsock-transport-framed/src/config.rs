use serde::{Deserialize, Serialize};

use crate::{
    error::HvsockError,
    frame::{MAX_MESSAGE_SIZE_LIMIT, MAX_MSG_SIZE},
};

/// 分帧连接配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将“单条数据消息的最大负载”显式配置化：调用级写入按此值切块，
///   每块独立加报文头，控制报文最多只需等待一块在途数据；
/// - 支持宿主在 TOML/JSON 配置文件中内嵌本结构（`serde`），未出现的字段取默认值。
///
/// ## 契约（What）
/// - `max_message_size` 默认 32768，即 [`MAX_MSG_SIZE`]；
/// - 合法范围为 `1..=MAX_MESSAGE_SIZE_LIMIT`，上限远低于保留控制码；
/// - **后置条件**：[`FramingConfig::validate`] 通过后的配置可用于构造连接，
///   连接构造时会再次校验，反序列化得到的越界值在那里被拒绝。
///
/// ## 设计取舍（Trade-offs）
/// - 块越大吞吐越高，但并发的控制报文等待时间也越长；
/// - 接收端不依赖本端配置解析对端报文，两端配置不同也能互通。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FramingConfig {
    max_message_size: u32,
}

impl FramingConfig {
    /// 创建默认配置。
    pub const fn new() -> Self {
        Self {
            max_message_size: MAX_MSG_SIZE,
        }
    }

    /// 设置单条消息最大负载。
    pub fn with_max_message_size(mut self, max_message_size: u32) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// 读取单条消息最大负载。
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), HvsockError> {
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(HvsockError::InvalidConfig(format!(
                "max_message_size 必须位于 1..={MAX_MESSAGE_SIZE_LIMIT}，实际为 {}",
                self.max_message_size
            )));
        }
        Ok(())
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_thirty_two_kib() {
        let config = FramingConfig::default();
        assert_eq!(config.max_message_size(), 32 * 1024);
        config.validate().expect("default is valid");
    }

    #[test]
    fn rejects_out_of_range_sizes() {
        for size in [0, MAX_MESSAGE_SIZE_LIMIT + 1, u32::MAX] {
            let err = FramingConfig::new()
                .with_max_message_size(size)
                .validate()
                .expect_err("out of range");
            assert_eq!(err.code(), "hvsock.framed.invalid_config");
        }
        FramingConfig::new()
            .with_max_message_size(MAX_MESSAGE_SIZE_LIMIT)
            .validate()
            .expect("upper bound is inclusive");
    }

    #[test]
    fn deserializes_from_toml_with_defaults() {
        let config: FramingConfig = toml::from_str("max_message_size = 1024").expect("toml");
        assert_eq!(config.max_message_size(), 1024);

        let config: FramingConfig = toml::from_str("").expect("empty toml");
        assert_eq!(config, FramingConfig::default());

        assert!(toml::from_str::<FramingConfig>("chunk = 1").is_err());
    }
}
