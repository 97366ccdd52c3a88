//! 端点协作接口：网络连接、applet 与会话。
//!
//! ## 设计目标（Why）
//! - 流接口同一时刻只绑定一种端点，用带标签的 [`Endpoint`] 枚举表达“未绑定 / 连接 / applet”，
//!   而不是共享指针加运行时类型检查；
//! - 具体传输（套接字、TLS、多路复用器）与 applet 实现都在本 crate 之外，这里只声明流接口
//!   需要消费的最小能力集合。
//!
//! ## 契约说明（What）
//! - 端点由流接口独占持有，生命周期内不会被其他接口访问；
//! - 所有方法都是非阻塞的：需要等待的情形通过返回值或错误位表达。

use core::fmt;
use std::net::SocketAddr;

use crate::error::ConnectError;
use crate::macros::bit_set;

bit_set! {
    /// 传递给传输层建连原语的标志。
    pub struct ConnectFlags: u8 {
        /// 输出通道已有待发送数据，可以随建连一起发出。
        const HAS_DATA = 1 << 0;
        /// 允许使用 TCP Fast Open。
        const CAN_USE_TFO = 1 << 1;
    }
}

bit_set! {
    /// 连接具备的控制层能力。
    pub struct ControlCaps: u8 {
        /// 已挂载控制层（协议族与套接字操作）。
        const CONTROL = 1 << 0;
        /// 控制层提供建连原语。
        const CONNECT = 1 << 1;
    }
}

bit_set! {
    /// 多路复用器状态查询结果。
    pub struct MuxStatus: u8 {
        /// 复用连接已确认可用。
        const READY = 1 << 0;
    }
}

/// 写方向关闭方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutMode {
    /// 干净关闭，允许 TLS 层向对端发送关闭通知。
    Normal,
    /// 不做数据层收尾，直接关闭。
    Silent,
}

/// 网络连接。
///
/// # 契约说明（What）
/// - `connect`：发起建连，错误原样返回，流接口不会据此改变状态；
/// - `is_ctrl_ready`/`is_xprt_ready`：二者同时为真表示连接已可用（连接池复用场景）；
/// - `shut_read`：排空并关闭读方向；`close(kill)` 关闭整个连接，`kill` 为真时不做 linger；
/// - `send`：尝试发送 `data`，返回实际写出的字节数；
/// - `has_error`：连接层是否已记录错误。
pub trait Connection {
    fn control_caps(&self) -> ControlCaps;

    fn connect(&mut self, flags: ConnectFlags) -> Result<(), ConnectError>;

    fn is_ctrl_ready(&self) -> bool;

    fn is_xprt_ready(&self) -> bool;

    fn mux_status(&self) -> MuxStatus;

    fn src(&self) -> Option<SocketAddr>;

    fn dst(&self) -> Option<SocketAddr>;

    fn shut_read(&mut self);

    fn shut_write(&mut self, mode: ShutMode);

    fn close(&mut self, kill: bool);

    fn send(&mut self, data: &[u8]) -> usize;

    fn has_error(&self) -> bool;
}

/// 内部服务处理器，表现得像端点但没有真实套接字。
pub trait Applet {
    fn name(&self) -> &str;

    /// 接收入口：输入通道腾出空间后被调用。
    fn on_receive(&mut self);

    /// 发送入口：输出通道有数据等待处理时被调用。
    fn on_send(&mut self);

    /// 唤醒 applet，让其在下一轮调度中运行。
    fn wake(&mut self);

    /// 释放回调，在接口关闭时调用一次。
    fn release(&mut self);
}

/// 流所属的客户端会话，提供前端接口的地址。
pub trait Session {
    fn src(&self) -> Option<SocketAddr>;

    fn dst(&self) -> Option<SocketAddr>;
}

/// 流接口当前绑定的端点。
#[derive(Default)]
pub enum Endpoint {
    /// 尚未绑定端点。
    #[default]
    Detached,
    Connection(Box<dyn Connection>),
    Applet(Box<dyn Applet>),
}

impl Endpoint {
    pub const fn kind(&self) -> &'static str {
        match self {
            Endpoint::Detached => "detached",
            Endpoint::Connection(_) => "connection",
            Endpoint::Applet(_) => "applet",
        }
    }

    pub const fn is_detached(&self) -> bool {
        matches!(self, Endpoint::Detached)
    }

    pub fn connection(&self) -> Option<&dyn Connection> {
        match self {
            Endpoint::Connection(conn) => Some(conn.as_ref()),
            _ => None,
        }
    }

    pub fn connection_mut(&mut self) -> Option<&mut (dyn Connection + 'static)> {
        match self {
            Endpoint::Connection(conn) => Some(conn.as_mut()),
            _ => None,
        }
    }

    pub fn applet_mut(&mut self) -> Option<&mut (dyn Applet + 'static)> {
        match self {
            Endpoint::Applet(applet) => Some(applet.as_mut()),
            _ => None,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Applet(applet) => write!(f, "Endpoint::Applet({})", applet.name()),
            other => write!(f, "Endpoint::{}", other.kind()),
        }
    }
}
