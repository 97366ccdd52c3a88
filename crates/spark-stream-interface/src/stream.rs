//! 流：两个流接口与两个通道的最小持有者。
//!
//! ## 设计目标（Why）
//! - 流接口之间没有直接引用，接口只能经由 [`Stream`] 按 [`Side`] 找到自己的通道与对端；
//! - 所有对外操作都在这里包装：`CLO` 下统一短路，其余情况查表分派到端点操作。
//!
//! ## 通道布线（What）
//! - 前端接口：输入为请求通道，输出为响应通道；
//! - 后端接口：输入为响应通道，输出为请求通道。
//!
//! ## 风险提示（Trade-offs）
//! - 单线程协作式执行，状态机内部没有任何锁；跨线程使用需由上层串行化。

use core::fmt;
use core::mem;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::addr::AddrSlot;
use crate::channel::{BufferWaiter, Channel, ChannelFlags};
use crate::config::InterfaceSettings;
use crate::endpoint::{Applet, Connection, Endpoint, Session};
use crate::error::{ErrorType, WakeError};
use crate::flags::{FlagOwner, InterfaceFlags};
use crate::interface::StreamInterface;
use crate::ops::{APPLET_OPS, CONN_OPS, EMBEDDED_OPS, InterfaceCtx};
use crate::state::{InterfaceState, SB_CONNECTED, SB_READY_OR_LATER, Side};
use crate::time::{Clock, Expiry};
use crate::wake::{IoEvents, IoTasklet, StreamTask, WakeHandle, WakeReason};

/// 一次被代理的请求/响应交换。
pub struct Stream {
    front: StreamInterface,
    back: StreamInterface,
    req: Box<dyn Channel>,
    res: Box<dyn Channel>,
    session: Box<dyn Session>,
    task: Box<dyn StreamTask>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: InterfaceSettings,
}

impl Stream {
    /// 组装一条流。
    ///
    /// - 前端接口直接处于 `EST`；后端接口处于 `INI`，重试预算取 `settings.conn_retries`；
    /// - `no_half`、`no_linger` 作用于两侧，`capture_source` 只作用于后端；
    /// - 两侧的唤醒句柄都绑定到 `tasklet`，布防即通知调度器。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: InterfaceSettings,
        session: Box<dyn Session>,
        req: Box<dyn Channel>,
        res: Box<dyn Channel>,
        task: Box<dyn StreamTask>,
        tasklet: Arc<dyn IoTasklet>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut front = StreamInterface::new(Side::Front);
        let mut back = StreamInterface::new(Side::Back);
        front.wait_event = WakeHandle::bound(Side::Front, Arc::clone(&tasklet));
        back.wait_event = WakeHandle::bound(Side::Back, tasklet);

        let mut common = InterfaceFlags::empty();
        common.set(InterfaceFlags::NOHALF, settings.no_half);
        common.set(InterfaceFlags::NOLINGER, settings.no_linger);
        for si in [&mut front, &mut back] {
            si.raise(FlagOwner::Stream, common);
            si.hcto = settings.half_close_timeout();
        }
        if settings.capture_source {
            back.raise(FlagOwner::Stream, InterfaceFlags::SRC_ADDR);
        }
        back.conn_retries = settings.conn_retries;
        front.set_state(InterfaceState::Est);

        Self {
            front,
            back,
            req,
            res,
            session,
            task,
            clock,
            settings,
        }
    }

    pub fn interface(&self, side: Side) -> &StreamInterface {
        match side {
            Side::Front => &self.front,
            Side::Back => &self.back,
        }
    }

    pub fn interface_mut(&mut self, side: Side) -> &mut StreamInterface {
        match side {
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        }
    }

    pub fn settings(&self) -> &InterfaceSettings {
        &self.settings
    }

    /// 暂停或恢复 `side` 接口对流任务的唤醒，流任务同步处理该接口期间使用。
    pub fn suppress_wakeups(&mut self, side: Side, on: bool) {
        let si = self.interface_mut(side);
        if on {
            si.raise(FlagOwner::Stream, InterfaceFlags::DONT_WAKE);
        } else {
            si.lower(FlagOwner::Stream, InterfaceFlags::DONT_WAKE);
        }
    }

    pub fn request(&self) -> &dyn Channel {
        &*self.req
    }

    pub fn response(&self) -> &dyn Channel {
        &*self.res
    }

    /// `side` 接口把数据推入的通道。
    pub fn input_channel(&self, side: Side) -> &dyn Channel {
        match side {
            Side::Front => &*self.req,
            Side::Back => &*self.res,
        }
    }

    /// `side` 接口从中取数据发往端点的通道。
    pub fn output_channel(&self, side: Side) -> &dyn Channel {
        self.input_channel(side.opposite())
    }

    pub fn input_channel_mut(&mut self, side: Side) -> &mut dyn Channel {
        match side {
            Side::Front => &mut *self.req,
            Side::Back => &mut *self.res,
        }
    }

    pub fn output_channel_mut(&mut self, side: Side) -> &mut dyn Channel {
        self.input_channel_mut(side.opposite())
    }

    pub(crate) fn session(&self) -> &dyn Session {
        &*self.session
    }

    pub(crate) fn interface_and_session(&mut self, side: Side) -> (&mut StreamInterface, &dyn Session) {
        let si = match side {
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        };
        (si, &*self.session)
    }

    /// 为 `side` 拆分借用，同时返回对端接口的状态。
    pub(crate) fn context(&mut self, side: Side) -> (InterfaceCtx<'_>, InterfaceState) {
        let now = self.clock.now();
        let (si, opposite, ic, oc) = match side {
            Side::Front => (&mut self.front, &self.back, &mut self.req, &mut self.res),
            Side::Back => (&mut self.back, &self.front, &mut self.res, &mut self.req),
        };
        let cx = InterfaceCtx {
            si,
            ic: &mut **ic,
            oc: &mut **oc,
            task: &*self.task,
            now,
        };
        (cx, opposite.state)
    }

    fn closed(&self, side: Side, op: &'static str) -> bool {
        let closed = self.interface(side).state.is_closed();
        if closed {
            trace!(side = %side, op, "ignored on closed stream interface");
        }
        closed
    }

    /// 关闭 `side` 的接收方向。
    pub fn shut_read(&mut self, side: Side) {
        if self.closed(side, "shut_read") {
            return;
        }
        let (mut cx, _) = self.context(side);
        let ops = cx.si.ops;
        ops.shut_read(&mut cx);
    }

    /// 关闭 `side` 的发送方向。
    pub fn shut_write(&mut self, side: Side) {
        if self.closed(side, "shut_write") {
            return;
        }
        let (mut cx, _) = self.context(side);
        let ops = cx.si.ops;
        ops.shut_write(&mut cx);
    }

    /// 在输入通道腾出空间等情形后尝试恢复接收。
    ///
    /// 对端已就绪时先自动解除 `RXBLK_CONN`；随后只有在没有任何接收阻塞、端点愿意推送
    /// 且状态为 `RDY`/`EST` 时才分派，分派前置位 `RX_WAIT_EP` 表示端点忙。
    /// 返回是否真正分派了 `check_receive`。
    pub fn check_receive(&mut self, side: Side) -> bool {
        if self.closed(side, "check_receive") {
            return false;
        }
        let (mut cx, opposite) = self.context(side);
        if cx.si.flags.contains(InterfaceFlags::RXBLK_CONN) && opposite.is_in(SB_READY_OR_LATER) {
            cx.si.rx_conn_rdy();
        }
        if cx.si.rx_blocked() || !cx.si.rx_endp_ready() {
            return false;
        }
        if !cx.si.state.is_in(SB_CONNECTED) {
            return false;
        }
        cx.si.flags.insert(InterfaceFlags::RX_WAIT_EP);
        let ops = cx.si.ops;
        ops.check_receive(&mut cx);
        true
    }

    /// 尝试把输出通道的数据推向端点。
    pub fn check_send(&mut self, side: Side) {
        if self.closed(side, "check_send") {
            return;
        }
        let (mut cx, _) = self.context(side);
        let ops = cx.si.ops;
        ops.check_send(&mut cx);
    }

    /// 通道层通知输入缓冲区有了空间：解除 `RXBLK_ROOM` 后立即重新评估接收条件。
    pub fn room_freed(&mut self, side: Side) -> bool {
        if self.closed(side, "room_freed") {
            return false;
        }
        self.interface_mut(side).rx_room_rdy();
        self.check_receive(side)
    }

    /// 为输入通道申请缓冲区，失败时置位 `RXBLK_BUFF` 并由通道层登记等待。
    pub fn alloc_input_buffer(&mut self, side: Side) -> bool {
        if self.closed(side, "alloc_input_buffer") {
            return false;
        }
        let (cx, _) = self.context(side);
        let granted = cx.ic.alloc_buffer(BufferWaiter { side });
        if !granted {
            cx.si.rx_buff_blk();
            trace!(side = %side, "input buffer unavailable, waiting");
        }
        granted
    }

    /// 分配器交付了等待中的缓冲区：解除 `RXBLK_BUFF` 并重新评估接收条件。
    pub fn buffer_granted(&mut self, side: Side) -> bool {
        if self.closed(side, "buffer_granted") {
            return false;
        }
        self.interface_mut(side).rx_buff_rdy();
        self.check_receive(side)
    }

    /// 按输入通道的状态更新接收方向的阻塞原因与读到期时间，然后尝试恢复接收。
    pub fn update_rx(&mut self, side: Side) {
        if self.closed(side, "update_rx") {
            return;
        }
        {
            let (cx, _) = self.context(side);
            let now = cx.now;
            let si = cx.si;
            let ic = cx.ic;
            if ic.control().flags.contains(ChannelFlags::SHUTR) {
                si.rx_shut_blk();
                return;
            }
            if ic.control().flags.contains(ChannelFlags::DONT_READ) {
                si.rx_chan_blk();
            } else {
                si.rx_chan_rdy();
            }
            if ic.may_receive() {
                si.rx_room_rdy();
            } else {
                si.rx_room_blk();
            }

            let ctl = ic.control_mut();
            if si.rx_blocked() {
                ctl.rex = Expiry::Never;
            } else if !ctl.flags.contains(ChannelFlags::READ_NOEXP) && !ctl.rex.is_set() {
                ctl.rex = Expiry::add_ifset(now, ctl.read_timeout);
            }
        }
        self.check_receive(side);
    }

    /// 按输出通道的状态更新发送方向的等待标志与写到期时间。
    pub fn update_tx(&mut self, side: Side) {
        if self.closed(side, "update_tx") {
            return;
        }
        let (cx, _) = self.context(side);
        let now = cx.now;
        let si = cx.si;
        if cx.oc.control().flags.contains(ChannelFlags::SHUTW) {
            return;
        }

        if cx.oc.is_empty() {
            if !si.tx_blocked() {
                let oc = cx.oc.control_mut();
                if !oc.flags.contains(ChannelFlags::SHUTW_NOW) {
                    si.raise(FlagOwner::Endpoint, InterfaceFlags::WAIT_DATA);
                }
                oc.wex = Expiry::Never;
            }
            return;
        }

        si.lower(FlagOwner::Endpoint, InterfaceFlags::WAIT_DATA);
        let oc = cx.oc.control_mut();
        if !oc.wex.is_set() {
            oc.wex = Expiry::add_ifset(now, oc.write_timeout);
            let wex = oc.wex;
            let ic = cx.ic.control_mut();
            if ic.rex.is_set() {
                ic.rex = wex;
            }
        }
    }

    /// 依次执行 [`Stream::update_rx`] 与 [`Stream::update_tx`]。
    pub fn update(&mut self, side: Side) {
        self.update_rx(side);
        self.update_tx(side);
    }

    /// 一轮流处理结束时同时协调两侧。
    ///
    /// - 清除两个通道的本轮活动标志，快照两侧的 `prev_state`；
    /// - 处于 `RDY`/`EST` 的一侧执行 [`Stream::update`]；
    /// - applet 端点若可接收或可发送，则唤醒它。
    pub fn update_both(&mut self) {
        self.req.control_mut().flags.remove(ChannelFlags::ACTIVITY);
        self.res.control_mut().flags.remove(ChannelFlags::ACTIVITY);
        self.front.prev_state = self.front.state;
        self.back.prev_state = self.back.state;

        for side in [Side::Front, Side::Back] {
            if self.interface(side).state.is_in(SB_CONNECTED) {
                self.update(side);
            }
        }

        for side in [Side::Front, Side::Back] {
            let si = self.interface_mut(side);
            let rx_ready = si.rx_endp_ready() && !si.rx_blocked();
            let tx_ready = si.tx_endp_ready() && !si.tx_blocked();
            if rx_ready || tx_ready {
                if let Some(applet) = si.endpoint.applet_mut() {
                    applet.wake();
                }
            }
        }
    }

    /// 检查接口的到期时间，到期时置位 `EXP` 并返回 `true`。
    pub fn check_timeouts(&mut self, side: Side) -> bool {
        if self.closed(side, "check_timeouts") {
            return false;
        }
        let now = self.clock.now();
        let si = self.interface_mut(side);
        if !si.exp.is_expired(now) {
            return false;
        }
        si.raise(FlagOwner::Stream, InterfaceFlags::EXP);
        debug!(side = %side, state = %si.state, "stream interface timeout expired");
        true
    }

    /// 报告一个数据层错误：尚无分类时记为 `DATA_ERR`，并在两个通道上标记读/写错误。
    pub fn report_error(&mut self, side: Side) {
        if self.closed(side, "report_error") {
            return;
        }
        let (cx, _) = self.context(side);
        if cx.si.err_type.is_empty() {
            cx.si.add_error(ErrorType::DATA_ERR);
        }
        cx.oc.control_mut().flags.insert(ChannelFlags::WRITE_ERROR);
        cx.ic.control_mut().flags.insert(ChannelFlags::READ_ERROR);
        debug!(side = %side, err_type = ?cx.si.err_type, "stream interface error reported");
    }

    /// 丢弃输入、向输出注入 `msg`，并安排输出发送完后关闭。
    pub fn return_and_close(&mut self, side: Side, msg: &[u8]) {
        if self.closed(side, "return_and_close") {
            return;
        }
        let (cx, _) = self.context(side);
        let ic = cx.ic.control_mut();
        ic.auto_read();
        ic.abort();
        ic.auto_close();
        cx.ic.erase();

        cx.oc.truncate();
        if !msg.is_empty() {
            cx.oc.inject(msg);
        }
        let oc = cx.oc.control_mut();
        oc.wex = Expiry::add_ifset(cx.now, oc.write_timeout);
        oc.auto_read();
        oc.auto_close();
        oc.shutr_now();
    }

    /// 唤醒句柄触发后的回调。
    ///
    /// `CLO` 下拒绝并取消句柄；否则消费待执行的事件，同步连接层的错误与建连完成，
    /// 然后唤醒流任务。等待多路复用器的复用连接不在这里推进，见
    /// [`Stream::poll_reused_connection`]。
    pub fn io_callback(&mut self, side: Side) -> Result<IoEvents, WakeError> {
        let (cx, _) = self.context(side);
        if cx.si.state.is_closed() {
            cx.si.wait_event.cancel();
            debug!(side = %side, "wake-up rejected after close");
            return Err(WakeError::Terminal);
        }
        let events = cx.si.wait_event.fire().inspect_err(|err| {
            trace!(side = %side, code = err.code(), "wake-up rejected");
        })?;

        let (errored, established) = match cx.si.endpoint.connection() {
            Some(conn) => (
                conn.has_error(),
                conn.is_ctrl_ready() && conn.is_xprt_ready(),
            ),
            None => (false, false),
        };
        if errored {
            cx.si.raise(FlagOwner::Endpoint, InterfaceFlags::ERR);
        }
        if cx.si.state == InterfaceState::Con && established && cx.si.mux_polls_left == 0 {
            cx.si.exp = Expiry::Never;
            cx.oc.control_mut().flags.insert(ChannelFlags::WRITE_NULL);
            cx.si.transition(InterfaceState::Rdy);
        }
        cx.wake_task(WakeReason::Io(events));
        Ok(events)
    }

    /// 绑定网络连接，操作表同步切换；返回此前的端点交由调用方处置。
    ///
    /// `CLO` 下拒绝绑定，传入的连接原样退回。
    pub fn attach_connection(&mut self, side: Side, conn: Box<dyn Connection>) -> Endpoint {
        if self.closed(side, "attach_connection") {
            return Endpoint::Connection(conn);
        }
        let si = self.interface_mut(side);
        let previous = mem::replace(&mut si.endpoint, Endpoint::Connection(conn));
        si.ops = &CONN_OPS;
        trace!(side = %side, previous = previous.kind(), "connection attached");
        previous
    }

    /// 注册 applet 作为端点：切换到 applet 操作表，宣告想拉取数据并唤醒 applet。
    ///
    /// `CLO` 下拒绝注册，applet 不被唤醒并原样退回。
    pub fn register_applet(&mut self, side: Side, applet: Box<dyn Applet>) -> Endpoint {
        if self.closed(side, "register_applet") {
            return Endpoint::Applet(applet);
        }
        let si = self.interface_mut(side);
        debug!(side = %side, applet = applet.name(), "applet registered");
        let previous = mem::replace(&mut si.endpoint, Endpoint::Applet(applet));
        si.ops = &APPLET_OPS;
        si.cant_get();
        if let Some(applet) = si.endpoint.applet_mut() {
            applet.wake();
        }
        previous
    }

    /// 解除端点绑定，恢复内嵌操作表；返回被解除的端点。
    pub fn detach_endpoint(&mut self, side: Side) -> Endpoint {
        let si = self.interface_mut(side);
        si.ops = &EMBEDDED_OPS;
        mem::take(&mut si.endpoint)
    }

    /// 拆除流：每一侧先取消唤醒句柄，再释放端点与地址缓存，最后进入 `CLO`。
    ///
    /// 重复调用是安全的。
    pub fn release(&mut self) {
        for side in [Side::Front, Side::Back] {
            let si = self.interface_mut(side);
            si.wait_event.cancel();
            let kill = si.flags.contains(InterfaceFlags::KILL_CONN);
            if let Some(conn) = si.endpoint.connection_mut() {
                conn.close(kill);
            }
            si.release_applet();
            si.endpoint = Endpoint::Detached;
            si.ops = &EMBEDDED_OPS;
            si.src = AddrSlot::Unresolved;
            si.dst = AddrSlot::Unresolved;
            if !si.state.is_closed() {
                si.transition(InterfaceState::Clo);
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("front", &self.front)
            .field("back", &self.back)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{Harness, StubApplet, StubConnection};
    use tracing_test::traced_test;

    #[test]
    fn construction_applies_settings() {
        let settings = InterfaceSettings {
            no_half: true,
            capture_source: true,
            half_close_timeout_ms: Some(200),
            ..InterfaceSettings::default()
        };
        let h = Harness::new(settings);
        let front = h.stream.interface(Side::Front);
        let back = h.stream.interface(Side::Back);

        assert_eq!(front.state(), InterfaceState::Est);
        assert_eq!(front.prev_state(), InterfaceState::Est);
        assert_eq!(back.state(), InterfaceState::Ini);
        assert_eq!(back.conn_retries(), 3);
        assert_eq!(front.conn_retries(), 0);
        assert!(front.flags().contains(InterfaceFlags::NOHALF));
        assert!(back.flags().contains(InterfaceFlags::SRC_ADDR));
        assert!(!front.flags().contains(InterfaceFlags::SRC_ADDR));
        assert_eq!(back.half_close_timeout(), Some(std::time::Duration::from_millis(200)));
    }

    #[test]
    fn attach_and_detach_switch_ops_together() {
        let mut h = Harness::default();
        let previous = h
            .stream
            .attach_connection(Side::Back, StubConnection::new().boxed());
        assert!(previous.is_detached());
        assert_eq!(h.stream.interface(Side::Back).ops_name(), "connection");

        let detached = h.stream.detach_endpoint(Side::Back);
        assert_eq!(detached.kind(), "connection");
        assert_eq!(h.stream.interface(Side::Back).ops_name(), "embedded");
        assert!(h.stream.interface(Side::Back).endpoint().is_detached());
    }

    #[test]
    fn register_applet_wants_data_and_wakes_handler() {
        let mut h = Harness::default();
        let applet = StubApplet::new("stats");
        h.stream.register_applet(Side::Back, applet.boxed());
        let back = h.stream.interface(Side::Back);
        assert_eq!(back.ops_name(), "applet");
        assert!(back.tx_endp_ready());
        assert!(back.tx_blocked());
        assert_eq!(applet.wakes(), 1);
    }

    #[test]
    fn report_error_classifies_once_and_flags_both_channels() {
        let mut h = Harness::default();
        h.stream.report_error(Side::Front);
        assert_eq!(h.stream.interface(Side::Front).err_type(), ErrorType::DATA_ERR);
        assert!(h.stream.request().control().flags.contains(ChannelFlags::READ_ERROR));
        assert!(h.stream.response().control().flags.contains(ChannelFlags::WRITE_ERROR));

        h.stream.interface_mut(Side::Back).add_error(ErrorType::CONN_TO);
        h.stream.report_error(Side::Back);
        assert_eq!(h.stream.interface(Side::Back).err_type(), ErrorType::CONN_TO);
    }

    #[test]
    fn return_and_close_replaces_output_and_schedules_shutdown() {
        let mut h = Harness::default();
        h.stream.input_channel_mut(Side::Front).inject(b"partial request");
        h.stream.output_channel_mut(Side::Front).inject(b"stale");

        h.stream.return_and_close(Side::Front, b"HTTP/1.1 503\r\n\r\n");

        let req = h.stream.request();
        assert!(req.is_empty());
        assert!(req.control().flags.contains(ChannelFlags::SHUTR_NOW | ChannelFlags::SHUTW_NOW));
        assert!(req.control().flags.contains(ChannelFlags::AUTO_CLOSE));

        let res = h.stream.response();
        assert_eq!(res.output(), b"staleHTTP/1.1 503\r\n\r\n");
        assert!(res.control().flags.contains(ChannelFlags::SHUTR_NOW | ChannelFlags::AUTO_CLOSE));
    }

    #[test]
    fn update_tx_waits_for_data_then_arms_write_expiry() {
        let mut h = Harness::default();
        h.stream.output_channel_mut(Side::Front).control_mut().write_timeout =
            Some(std::time::Duration::from_secs(5));
        h.stream.update_tx(Side::Front);
        assert!(h.stream.interface(Side::Front).tx_blocked());

        h.stream.output_channel_mut(Side::Front).inject(b"data");
        h.stream.update_tx(Side::Front);
        assert!(!h.stream.interface(Side::Front).tx_blocked());
        assert!(h.stream.response().control().wex.is_set());
    }

    #[test]
    fn update_both_snapshots_previous_state() {
        let mut h = Harness::default();
        h.stream.interface_mut(Side::Back).transition(InterfaceState::Req);
        assert_eq!(h.stream.interface(Side::Back).prev_state(), InterfaceState::Ini);
        h.stream.update_both();
        assert_eq!(h.stream.interface(Side::Back).prev_state(), InterfaceState::Req);
    }

    #[test]
    fn check_timeouts_sets_exp_once_deadline_passes() {
        let mut h = Harness::default();
        let deadline = h.clock.now() + std::time::Duration::from_secs(2);
        h.stream.interface_mut(Side::Back).set_exp(Expiry::At(deadline));
        assert!(!h.stream.check_timeouts(Side::Back));
        h.clock.advance(std::time::Duration::from_secs(2));
        assert!(h.stream.check_timeouts(Side::Back));
        assert!(h.stream.interface(Side::Back).flags().contains(InterfaceFlags::EXP));
    }

    #[test]
    fn suppressed_interface_does_not_wake_task() {
        let mut h = Harness::default();
        h.stream.suppress_wakeups(Side::Front, true);
        h.stream.shut_read(Side::Front);
        assert!(h.stream.request().control().flags.contains(ChannelFlags::SHUTR));
        assert_eq!(h.task.count(), 0);

        h.stream.suppress_wakeups(Side::Front, false);
        assert!(!h.stream.interface(Side::Front).flags().contains(InterfaceFlags::DONT_WAKE));
        h.stream.shut_write(Side::Front);
        assert_eq!(h.stream.interface(Side::Front).state(), InterfaceState::Dis);
        assert_eq!(h.task.wakeups(), vec![WakeReason::Shutdown]);
    }

    #[test]
    fn both_wake_handles_are_bound_at_construction() {
        let h = Harness::default();
        for side in [Side::Front, Side::Back] {
            assert!(h.stream.interface(side).wait_event().is_bound());
        }
        assert!(h.task.armed().is_empty());
    }

    #[test]
    #[traced_test]
    fn wakeups_after_release_are_rejected_and_logged() {
        let mut h = Harness::default();
        let conn = StubConnection::new();
        h.stream.attach_connection(Side::Back, conn.boxed());
        h.stream.interface_mut(Side::Back).set_state(InterfaceState::Est);
        assert!(h.stream.check_receive(Side::Back));
        assert!(h.stream.interface(Side::Back).wait_event().is_scheduled());

        h.stream.release();
        assert_eq!(conn.closes(), vec![false]);
        assert!(h.stream.interface(Side::Back).wait_event().is_cancelled());
        assert_eq!(h.stream.io_callback(Side::Back), Err(WakeError::Terminal));
        assert!(logs_contain("wake-up rejected after close"));
        assert_eq!(h.task.count(), 0);
    }
}
