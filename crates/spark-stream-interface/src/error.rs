//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 流接口层只负责“分类并返回”，从不中止进程、也不在 warn/error 级别打日志；
//!   用户可见的行为（响应生成、日志、统计）完全由上层依据这里产出的分类决定。
//! - 因此分类必须总是存在，且总是 [`ErrorClass`] 四种之一。
//!
//! ## 设计要求（What）
//! - [`ConnectError`]：建连控制器的封闭结果集合，内部错误、资源耗尽或传输失败；
//! - [`ErrorType`]：每个接口累积的错误类别位图，重试耗尽后原样交给上层；
//! - [`WakeError`]、[`ConfigError`]：唤醒句柄与配置加载的失败；
//! - 所有错误都提供形如 `stream_interface.<area>.<reason>` 的稳定错误码。

use thiserror::Error;

use crate::macros::bit_set;

/// 错误分类。
///
/// - `Internal`：端点缺少能力等编程级缺陷，不重试；
/// - `Transport`：端点报告的建连或 IO 失败，在预算内重试，耗尽后上报；
/// - `ResourceExhausted`：暂无缓冲区等资源，资源释放后总会重试；
/// - `Timeout`：超时到期，由流层策略决定中止还是回退。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Internal,
    Transport,
    ResourceExhausted,
    Timeout,
}

impl ErrorClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Internal => "internal",
            ErrorClass::Transport => "transport",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::Timeout => "timeout",
        }
    }
}

bit_set! {
    /// 接口上累积的错误类别。
    pub struct ErrorType: u16 {
        /// 排队超时。
        const QUEUE_TO = 1 << 0;
        /// 排队失败。
        const QUEUE_ERR = 1 << 1;
        /// 排队期间被客户端中止。
        const QUEUE_ABRT = 1 << 2;
        /// 建连超时。
        const CONN_TO = 1 << 3;
        /// 建连失败。
        const CONN_ERR = 1 << 4;
        /// 建连期间被客户端中止。
        const CONN_ABRT = 1 << 5;
        /// 建连时资源耗尽。
        const CONN_RES = 1 << 6;
        /// 建连时出现内部错误。
        const CONN_OTHER = 1 << 7;
        /// 数据传输超时。
        const DATA_TO = 1 << 8;
        /// 数据传输出错。
        const DATA_ERR = 1 << 9;
        /// 数据传输期间被客户端中止。
        const DATA_ABRT = 1 << 10;
    }
}

impl ErrorType {
    /// 将累积类别折叠为单一分类，按内部错误、资源耗尽、传输失败、超时的顺序取最严重者。
    ///
    /// 空集合返回 `None`。
    pub const fn class(self) -> Option<ErrorClass> {
        if self.intersects(ErrorType::CONN_OTHER) {
            Some(ErrorClass::Internal)
        } else if self.intersects(ErrorType::CONN_RES) {
            Some(ErrorClass::ResourceExhausted)
        } else if self.intersects(
            ErrorType::QUEUE_ERR
                .union(ErrorType::QUEUE_ABRT)
                .union(ErrorType::CONN_ERR)
                .union(ErrorType::CONN_ABRT)
                .union(ErrorType::DATA_ERR)
                .union(ErrorType::DATA_ABRT),
        ) {
            Some(ErrorClass::Transport)
        } else if self.is_empty() {
            None
        } else {
            Some(ErrorClass::Timeout)
        }
    }
}

/// 传输层报告的具体失败原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    /// 对端立即拒绝。
    Refused,
    TimedOut,
    Reset,
    Unreachable,
    /// 复用连接的多路复用器在有限轮询内始终未就绪。
    MuxNotReady,
    Other,
}

/// 建连控制器的结果。
///
/// # 教案式说明
/// - **意图 (Why)**：`connect` 只有三种结局：成功、内部错误、传输层错误；不存在“部分成功”。
///   资源耗尽单列一类，以便上层总是在资源释放后重试。
/// - **契约 (What)**：
///   - `Internal` 不改变接口状态，也不消耗重试预算；
///   - `Transport` 由传输层原样返回，同样不改变状态，由调用方通过
///     [`Stream::connect_failed`](crate::Stream::connect_failed) 进入 `CER`；
///   - [`ConnectError::code`] 返回稳定错误码，可直接用于告警维度。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// 缺少连接、控制层或建连能力。
    #[error("stream interface cannot connect: {reason}")]
    Internal { reason: &'static str },

    /// 传输层没有可用资源（端口、文件描述符、内存）。
    #[error("connect aborted: transport resources exhausted")]
    Resource,

    /// 传输层建连失败。
    #[error("transport connect failed: {kind:?}")]
    Transport { kind: TransportFailure },
}

impl ConnectError {
    /// 构造内部错误。
    pub const fn internal(reason: &'static str) -> Self {
        ConnectError::Internal { reason }
    }

    /// 构造传输层错误。
    pub const fn transport(kind: TransportFailure) -> Self {
        ConnectError::Transport { kind }
    }

    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            ConnectError::Internal { .. } => "stream_interface.connect.internal",
            ConnectError::Resource => "stream_interface.connect.resource",
            ConnectError::Transport { kind } => match kind {
                TransportFailure::Refused => "stream_interface.connect.refused",
                TransportFailure::TimedOut => "stream_interface.connect.timeout",
                TransportFailure::Reset => "stream_interface.connect.reset",
                TransportFailure::Unreachable => "stream_interface.connect.unreachable",
                TransportFailure::MuxNotReady => "stream_interface.connect.mux_not_ready",
                TransportFailure::Other => "stream_interface.connect.transport",
            },
        }
    }

    pub const fn class(&self) -> ErrorClass {
        match self {
            ConnectError::Internal { .. } => ErrorClass::Internal,
            ConnectError::Resource => ErrorClass::ResourceExhausted,
            ConnectError::Transport {
                kind: TransportFailure::TimedOut,
            } => ErrorClass::Timeout,
            ConnectError::Transport { .. } => ErrorClass::Transport,
        }
    }

    /// 进入 `CER` 时记入接口的错误类别。
    pub const fn error_type(&self) -> ErrorType {
        match self {
            ConnectError::Internal { .. } => ErrorType::CONN_OTHER,
            ConnectError::Resource => ErrorType::CONN_RES,
            ConnectError::Transport {
                kind: TransportFailure::TimedOut,
            } => ErrorType::CONN_TO,
            ConnectError::Transport { .. } => ErrorType::CONN_ERR,
        }
    }

    /// 是否为立即拒绝：重试前需要先经过 tarpit 延迟。
    pub const fn is_immediate_refusal(&self) -> bool {
        matches!(
            self,
            ConnectError::Transport {
                kind: TransportFailure::Refused
            }
        )
    }
}

/// 唤醒句柄的拒绝原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum WakeError {
    /// 句柄已被取消，接口已拆除。
    #[error("wake-up handle was cancelled")]
    Cancelled,
    /// 句柄当前没有待触发的唤醒。
    #[error("wake-up handle fired while not scheduled")]
    NotScheduled,
    /// 接口已处于 `CLO`。
    #[error("wake-up rejected: interface is closed")]
    Terminal,
}

impl WakeError {
    pub const fn code(&self) -> &'static str {
        match self {
            WakeError::Cancelled => "stream_interface.wake.cancelled",
            WakeError::NotScheduled => "stream_interface.wake.not_scheduled",
            WakeError::Terminal => "stream_interface.wake.terminal",
        }
    }
}

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析或字段类型不匹配。
    #[error("invalid stream interface settings: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值违反约束。
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub const fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "stream_interface.config.parse",
            ConfigError::Invalid { .. } => "stream_interface.config.invalid",
        }
    }
}
