#![deny(unsafe_code)]

//! # spark-stream-interface
//!
//! ## 定位与职责（Why）
//! - 反向代理中一条流（请求/响应交换）的两个方向各由一个流接口表示：前端面向客户端，
//!   后端面向服务器；流接口把通道层与端点层（网络连接、applet 或未绑定）粘合在一起；
//! - 本 crate 提供流接口的连接状态机、接收/发送流控标志协议、按端点种类分派的四个操作、
//!   后端建连与重试控制器，以及地址缓存与唤醒原语。
//!
//! ## 架构嵌入（Where）
//! - [`stream`]：持有两个接口与两个通道，所有对外操作的入口；
//! - [`interface`] 与 [`flags`]、[`state`]：单个接口的状态与流控标志；
//! - [`ops`]：内嵌、连接、applet 三张操作表；
//! - [`connect`]：`INI → … → EST` 的建连与重试；
//! - [`channel`]、[`endpoint`]、[`wake`]：外部协作者需要实现的 trait；
//! - [`config`]、[`error`]、[`time`]：配置、错误分类与可注入时钟；
//! - [`test_stubs`]：单元测试与集成测试共享的桩实现。
//!
//! ## 执行模型（Trade-offs）
//! - 单线程协作式：一条流的所有操作在同一个任务中串行执行，内部没有锁；
//! - 日志只使用 `tracing` 的 `trace!`/`debug!`，由宿主决定订阅方式。

mod macros;

pub mod addr;
pub mod channel;
pub mod config;
pub mod connect;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod interface;
pub mod ops;
pub mod state;
pub mod stream;
pub mod test_stubs;
pub mod time;
pub mod wake;

pub use addr::AddrSlot;
pub use channel::{BufferWaiter, Channel, ChannelControl, ChannelFlags};
pub use config::InterfaceSettings;
pub use endpoint::{Applet, ConnectFlags, Connection, ControlCaps, Endpoint, MuxStatus, Session, ShutMode};
pub use error::{ConfigError, ConnectError, ErrorClass, ErrorType, TransportFailure, WakeError};
pub use flags::{FlagOwner, InterfaceFlags};
pub use interface::StreamInterface;
pub use ops::{EndpointOps, InterfaceCtx};
pub use state::{InterfaceState, Side, StateMask};
pub use stream::Stream;
pub use time::{Clock, Expiry, SystemClock};
pub use wake::{IoEvents, IoTasklet, StreamTask, WakeHandle, WakeReason};
