//! 流接口本体。
//!
//! ## 设计目标（Why）
//! - 一个 [`StreamInterface`] 代表流的一个方向，绑定一个端点、一张操作表和地址缓存；
//! - 接口本身不持有通道或对端接口的引用，跨接口的效果全部经由 [`Stream`](crate::Stream)
//!   按 [`Side`] 查找，在这一层不形成引用环。
//!
//! ## 契约说明（What）
//! - 操作表与端点种类总是一起切换（见 `attach_connection`/`register_applet`/`detach_endpoint`）；
//! - 流控标志的每个修改入口都标明归属子系统，调试构建下断言比特确实属于该子系统；
//! - `prev_state` 只由 [`StreamInterface::set_state`] 与 `update_both` 快照，调用方据此做边沿检测。

use core::fmt;
use std::time::Duration;

use tracing::trace;

use crate::addr::AddrSlot;
use crate::endpoint::Endpoint;
use crate::error::{ConnectError, ErrorType};
use crate::flags::{FlagOwner, InterfaceFlags};
use crate::ops::{EMBEDDED_OPS, EndpointOps};
use crate::state::{InterfaceState, Side};
use crate::time::Expiry;
use crate::wake::WakeHandle;

/// 流的一个方向上的流接口。
pub struct StreamInterface {
    pub(crate) state: InterfaceState,
    pub(crate) prev_state: InterfaceState,
    pub(crate) side: Side,
    pub(crate) flags: InterfaceFlags,
    pub(crate) ops: &'static dyn EndpointOps,
    pub(crate) endpoint: Endpoint,
    pub(crate) src: AddrSlot,
    pub(crate) dst: AddrSlot,
    pub(crate) conn_retries: u32,
    pub(crate) err_type: ErrorType,
    pub(crate) exp: Expiry,
    pub(crate) wait_event: WakeHandle,
    pub(crate) hcto: Option<Duration>,
    pub(crate) mux_polls_left: u32,
    pub(crate) last_error: Option<ConnectError>,
}

impl StreamInterface {
    /// 在 `INI` 状态创建接口：未绑定端点、使用内嵌操作表、唤醒句柄空闲。
    pub fn new(side: Side) -> Self {
        Self {
            state: InterfaceState::Ini,
            prev_state: InterfaceState::Ini,
            side,
            flags: InterfaceFlags::empty(),
            ops: &EMBEDDED_OPS,
            endpoint: Endpoint::Detached,
            src: AddrSlot::Unresolved,
            dst: AddrSlot::Unresolved,
            conn_retries: 0,
            err_type: ErrorType::empty(),
            exp: Expiry::Never,
            wait_event: WakeHandle::new(),
            hcto: None,
            mux_polls_left: 0,
            last_error: None,
        }
    }

    pub const fn state(&self) -> InterfaceState {
        self.state
    }

    /// 当前状态的三字母名称（`"INI"` … `"CLO"`），用于诊断输出。
    pub const fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub const fn prev_state(&self) -> InterfaceState {
        self.prev_state
    }

    pub const fn side(&self) -> Side {
        self.side
    }

    pub const fn flags(&self) -> InterfaceFlags {
        self.flags
    }

    /// 剩余建连重试预算，同时用于日志。
    pub const fn conn_retries(&self) -> u32 {
        self.conn_retries
    }

    pub const fn err_type(&self) -> ErrorType {
        self.err_type
    }

    pub const fn exp(&self) -> Expiry {
        self.exp
    }

    pub fn set_exp(&mut self, exp: Expiry) {
        self.exp = exp;
    }

    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub const fn wait_event(&self) -> &WakeHandle {
        &self.wait_event
    }

    /// 当前操作表的名称：`embedded`、`connection` 或 `applet`。
    pub fn ops_name(&self) -> &'static str {
        self.ops.name()
    }

    pub const fn half_close_timeout(&self) -> Option<Duration> {
        self.hcto
    }

    /// 最近一次进入 `CER` 时记录的建连错误。
    pub const fn last_connect_error(&self) -> Option<&ConnectError> {
        self.last_error.as_ref()
    }

    pub const fn source_slot(&self) -> AddrSlot {
        self.src
    }

    pub const fn destination_slot(&self) -> AddrSlot {
        self.dst
    }

    /// 同时设置当前与前一状态，主要用于把入站接口直接创建在 `EST`。
    pub fn set_state(&mut self, state: InterfaceState) {
        self.state = state;
        self.prev_state = state;
    }

    pub(crate) fn transition(&mut self, to: InterfaceState) {
        trace!(side = %self.side, from = %self.state, to = %to, "stream interface state change");
        self.state = to;
    }

    /// 记入一个错误类别。
    pub fn add_error(&mut self, err: ErrorType) {
        self.err_type.insert(err);
    }

    /// 以 `owner` 的身份置位。
    pub fn raise(&mut self, owner: FlagOwner, flags: InterfaceFlags) {
        debug_assert!(owner.owns(flags), "{owner:?} does not own {flags:?}");
        self.flags.insert(flags);
    }

    /// 以 `owner` 的身份清除。
    pub fn lower(&mut self, owner: FlagOwner, flags: InterfaceFlags) {
        debug_assert!(owner.owns(flags), "{owner:?} does not own {flags:?}");
        self.flags.remove(flags);
    }

    /// 接收方向是否被任一原因阻塞。
    pub const fn rx_blocked(&self) -> bool {
        self.flags.intersects(InterfaceFlags::RXBLK_ANY)
    }

    pub const fn rx_blocked_room(&self) -> bool {
        self.flags.intersects(InterfaceFlags::RXBLK_ROOM)
    }

    /// 端点是否愿意继续推送数据。
    pub const fn rx_endp_ready(&self) -> bool {
        !self.flags.intersects(InterfaceFlags::RX_WAIT_EP)
    }

    /// 端点宣告还想再尝试投递数据。
    pub fn rx_endp_more(&mut self) {
        self.lower(FlagOwner::Endpoint, InterfaceFlags::RX_WAIT_EP);
    }

    /// 端点宣告没有更多数据。
    pub fn rx_endp_done(&mut self) {
        self.raise(FlagOwner::Endpoint, InterfaceFlags::RX_WAIT_EP);
    }

    pub fn rx_chan_rdy(&mut self) {
        self.lower(FlagOwner::Stream, InterfaceFlags::RXBLK_CHAN);
    }

    pub fn rx_chan_blk(&mut self) {
        self.raise(FlagOwner::Stream, InterfaceFlags::RXBLK_CHAN);
    }

    /// 对端已连接。
    pub fn rx_conn_rdy(&mut self) {
        self.lower(FlagOwner::Stream, InterfaceFlags::RXBLK_CONN);
    }

    /// 需要等待对端连接。
    pub fn rx_conn_blk(&mut self) {
        self.raise(FlagOwner::Stream, InterfaceFlags::RXBLK_CONN);
    }

    /// 拿到了等待中的输入缓冲区。
    pub fn rx_buff_rdy(&mut self) {
        self.lower(FlagOwner::Buffer, InterfaceFlags::RXBLK_BUFF);
    }

    /// 申请输入缓冲区失败。
    ///
    /// 同时清除 `RX_WAIT_EP`：缓冲区到手后端点必须被再次调用。
    pub fn rx_buff_blk(&mut self) {
        self.flags = self
            .flags
            .union(InterfaceFlags::RXBLK_BUFF)
            .difference(InterfaceFlags::RX_WAIT_EP);
    }

    /// 输入缓冲区腾出了空间。
    pub fn rx_room_rdy(&mut self) {
        self.lower(FlagOwner::Channel, InterfaceFlags::RXBLK_ROOM);
    }

    /// 因空间不足未能写入输入缓冲区，同样清除 `RX_WAIT_EP`。
    pub fn rx_room_blk(&mut self) {
        self.flags = self
            .flags
            .union(InterfaceFlags::RXBLK_ROOM)
            .difference(InterfaceFlags::RX_WAIT_EP);
    }

    /// 接收方向永久关闭；没有对应的解除操作。
    pub fn rx_shut_blk(&mut self) {
        self.raise(FlagOwner::Stream, InterfaceFlags::RXBLK_SHUT);
    }

    /// 发送方向是否在等待输出数据。
    pub const fn tx_blocked(&self) -> bool {
        self.flags.intersects(InterfaceFlags::WAIT_DATA)
    }

    /// 端点是否希望拉取输出数据。
    pub const fn tx_endp_ready(&self) -> bool {
        self.flags.intersects(InterfaceFlags::WANT_GET)
    }

    pub fn want_get(&mut self) {
        self.raise(FlagOwner::Endpoint, InterfaceFlags::WANT_GET);
    }

    /// 想拉取数据却发现没有数据：同时置位 `WANT_GET` 与 `WAIT_DATA`。
    pub fn cant_get(&mut self) {
        self.raise(
            FlagOwner::Endpoint,
            InterfaceFlags::WANT_GET | InterfaceFlags::WAIT_DATA,
        );
    }

    pub fn stop_get(&mut self) {
        self.lower(FlagOwner::Endpoint, InterfaceFlags::WANT_GET);
    }

    /// 不再从输出通道拉取任何数据。
    pub fn done_get(&mut self) {
        self.lower(
            FlagOwner::Endpoint,
            InterfaceFlags::WANT_GET | InterfaceFlags::WAIT_DATA,
        );
    }

    /// 标记下一次关闭写方向时销毁整个连接。
    pub fn must_kill_conn(&mut self) {
        self.raise(FlagOwner::Stream, InterfaceFlags::KILL_CONN);
    }

    /// 调用端点的 applet 释放回调，已处于 `DIS`/`CLO` 时跳过。
    pub(crate) fn release_applet(&mut self) {
        if self.state.is_in(crate::state::SB_DISCONNECTED) {
            return;
        }
        if let Some(applet) = self.endpoint.applet_mut() {
            applet.release();
        }
    }
}

impl fmt::Debug for StreamInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterface")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("prev_state", &self.prev_state)
            .field("flags", &self.flags)
            .field("ops", &self.ops.name())
            .field("endpoint", &self.endpoint)
            .field("conn_retries", &self.conn_retries)
            .field("err_type", &self.err_type)
            .field("exp", &self.exp)
            .finish()
    }
}
