//! 流接口配置。
//!
//! ### 设计目的（Why）
//! - 重试预算、tarpit 延迟、重新分派、复用连接的多路复用器轮询上限等策略集中在
//!   [`InterfaceSettings`]，由 [`Stream`](crate::Stream) 在构造时分发给两个接口；
//! - 代理本身的配置解析不在本 crate 范围内，这里只接受一个小型 TOML 片段。
//!
//! ### 契约说明（What）
//! - 所有字段都有默认值，TOML 中缺省的字段取默认；未知字段被拒绝；
//! - [`InterfaceSettings::validate`] 拒绝 `conn_retries = 0` 与 `mux_ready_polls = 0`。

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 流接口策略设置。
///
/// ```
/// use spark_stream_interface::InterfaceSettings;
///
/// let settings = InterfaceSettings::from_toml_str("conn_retries = 5\nredispatch = true")
///     .expect("合法配置");
/// assert_eq!(settings.conn_retries, 5);
/// assert!(settings.redispatch);
/// assert_eq!(settings.mux_ready_polls, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceSettings {
    /// 建连尝试次数上限；连续失败这么多次后接口进入 `CLO`。
    pub conn_retries: u32,
    /// 立即被拒绝后、重试前的 tarpit 延迟（毫秒）。
    pub tarpit_delay_ms: u64,
    /// 最后一次重试时允许重新分派到其他服务器。
    pub redispatch: bool,
    /// 复用连接在多路复用器未就绪时最多再查询几次。
    pub mux_ready_polls: u32,
    /// 写方向关闭后读方向的半关闭超时（毫秒）。
    pub half_close_timeout_ms: Option<u64>,
    pub no_half: bool,
    pub no_linger: bool,
    /// 建连时记录后端源地址，用于日志。
    pub capture_source: bool,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            conn_retries: 3,
            tarpit_delay_ms: 1000,
            redispatch: false,
            mux_ready_polls: 3,
            half_close_timeout_ms: None,
            no_half: false,
            no_linger: false,
            capture_source: false,
        }
    }
}

impl InterfaceSettings {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conn_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "conn_retries",
                reason: "at least one connection attempt is required",
            });
        }
        if self.mux_ready_polls == 0 {
            return Err(ConfigError::Invalid {
                field: "mux_ready_polls",
                reason: "reused connections need at least one readiness poll",
            });
        }
        Ok(())
    }

    pub const fn tarpit_delay(&self) -> Duration {
        Duration::from_millis(self.tarpit_delay_ms)
    }

    pub fn half_close_timeout(&self) -> Option<Duration> {
        self.half_close_timeout_ms.map(Duration::from_millis)
    }
}
