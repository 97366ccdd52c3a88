//! 端点操作表。
//!
//! ## 设计目标（Why）
//! - 四个操作（关闭读、关闭写、尝试接收、尝试发送）按端点种类有三种实现：
//!   内嵌（尚未绑定端点）、网络连接、applet；
//! - 调用方只做表查找 `si.ops.check_receive(cx)`，从不按端点种类分支，新增端点种类只需新增一张表。
//!
//! ## 契约说明（What）
//! - 三张表都是无状态的 `'static` 单例，所有上下文都经 [`InterfaceCtx`] 传入；
//! - 表本身不检查 `CLO`：吸收态由 [`Stream`](crate::Stream) 的包装方法统一拦截；
//! - 读/写关闭对每个方向只生效一次，重复调用直接返回。

use std::time::Instant;

use tracing::trace;

use crate::channel::{Channel, ChannelFlags};
use crate::endpoint::ShutMode;
use crate::flags::{FlagOwner, InterfaceFlags};
use crate::interface::StreamInterface;
use crate::state::{InterfaceState, SB_CONNECTED, SB_CONNECTING, SB_PRE_CONNECT};
use crate::time::Expiry;
use crate::wake::{IoEvents, StreamTask, WakeReason};

/// 操作分派时的拆分借用：接口本身、它的输入/输出通道、流任务和当前时间。
pub struct InterfaceCtx<'a> {
    pub si: &'a mut StreamInterface,
    /// 接口把数据推入的通道。
    pub ic: &'a mut dyn Channel,
    /// 接口从中取出数据发往端点的通道。
    pub oc: &'a mut dyn Channel,
    pub task: &'a dyn StreamTask,
    pub now: Instant,
}

impl InterfaceCtx<'_> {
    /// 唤醒流任务，`DONT_WAKE` 置位时跳过。
    pub fn wake_task(&self, reason: WakeReason) {
        if !self.si.flags.intersects(InterfaceFlags::DONT_WAKE) {
            self.task.wakeup(reason);
        }
    }
}

/// 端点操作表。
pub trait EndpointOps: Send + Sync {
    fn name(&self) -> &'static str;

    /// 通过当前端点关闭接收方向。
    fn shut_read(&self, cx: &mut InterfaceCtx<'_>);

    /// 通过当前端点关闭发送方向；`KILL_CONN` 置位时销毁整个连接而非半关闭。
    fn shut_write(&self, cx: &mut InterfaceCtx<'_>);

    /// 尝试把端点上新到的数据拉入输入通道。
    fn check_receive(&self, cx: &mut InterfaceCtx<'_>);

    /// 尝试把输出通道中的数据推给端点。
    fn check_send(&self, cx: &mut InterfaceCtx<'_>);
}

/// 未绑定端点时的惰性默认表。
pub struct EmbeddedOps;

/// 网络连接表。
pub struct ConnectionOps;

/// applet 表。
pub struct AppletOps;

pub static EMBEDDED_OPS: EmbeddedOps = EmbeddedOps;
pub static CONN_OPS: ConnectionOps = ConnectionOps;
pub static APPLET_OPS: AppletOps = AppletOps;

/// 关闭读方向的公共前缀；返回 `true` 表示状态允许继续处理端点。
fn begin_shut_read(cx: &mut InterfaceCtx<'_>) -> bool {
    cx.si.rx_shut_blk();
    let ctl = cx.ic.control_mut();
    if ctl.flags.contains(ChannelFlags::SHUTR) {
        return false;
    }
    ctl.flags.insert(ChannelFlags::SHUTR);
    ctl.rex = Expiry::Never;
    cx.si.state.is_in(SB_CONNECTING)
}

/// 关闭写方向的公共前缀；写方向已关闭时返回 `false`。
fn begin_shut_write(cx: &mut InterfaceCtx<'_>) -> bool {
    let oc = cx.oc.control_mut();
    oc.flags.remove(ChannelFlags::SHUTW_NOW);
    if oc.flags.contains(ChannelFlags::SHUTW) {
        return false;
    }
    oc.flags.insert(ChannelFlags::SHUTW);
    oc.wex = Expiry::Never;
    cx.si.done_get();

    if let Some(hcto) = cx.si.hcto {
        let ic = cx.ic.control_mut();
        ic.read_timeout = Some(hcto);
        ic.rex = Expiry::At(cx.now + hcto);
    }
    true
}

/// `RDY`/`EST` 下能否立即关闭整个接口，而不是保留半关闭等待对端。
fn may_close_now(cx: &InterfaceCtx<'_>) -> bool {
    cx.si
        .flags
        .intersects(InterfaceFlags::ERR | InterfaceFlags::NOLINGER)
        || cx
            .ic
            .control()
            .flags
            .intersects(ChannelFlags::SHUTR | ChannelFlags::DONT_READ)
}

/// 关闭写方向的收尾：读方向一并关闭，清除到期时间。
fn finish_shut_write(cx: &mut InterfaceCtx<'_>) {
    cx.si.lower(FlagOwner::Stream, InterfaceFlags::NOLINGER);
    cx.si.rx_shut_blk();
    let ic = cx.ic.control_mut();
    ic.flags.insert(ChannelFlags::SHUTR);
    ic.rex = Expiry::Never;
    cx.si.exp = Expiry::Never;
}

fn enter_dis(cx: &mut InterfaceCtx<'_>) {
    cx.si.transition(InterfaceState::Dis);
    cx.si.exp = Expiry::Never;
}

impl EndpointOps for EmbeddedOps {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn shut_read(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_read(cx) {
            return;
        }
        if cx.oc.control().flags.contains(ChannelFlags::SHUTW) {
            enter_dis(cx);
        } else if cx.si.flags.contains(InterfaceFlags::NOHALF) {
            return self.shut_write(cx);
        }
        cx.wake_task(WakeReason::Shutdown);
    }

    fn shut_write(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_write(cx) {
            return;
        }
        let state = cx.si.state;
        match state {
            state if state.is_in(SB_CONNECTED) && !may_close_now(cx) => return,
            state if state.is_in(SB_CONNECTED.union(SB_PRE_CONNECT)) => {
                cx.si.transition(InterfaceState::Dis)
            }
            _ => {}
        }
        finish_shut_write(cx);
        cx.wake_task(WakeReason::Shutdown);
    }

    fn check_receive(&self, cx: &mut InterfaceCtx<'_>) {
        if !cx.ic.may_receive() {
            cx.si.rx_room_blk();
        } else {
            cx.wake_task(WakeReason::Io(IoEvents::RECV));
        }
    }

    fn check_send(&self, cx: &mut InterfaceCtx<'_>) {
        if cx.si.state != InterfaceState::Est
            || cx.oc.control().flags.contains(ChannelFlags::SHUTW)
        {
            return;
        }
        if !cx.si.tx_blocked() || cx.oc.is_empty() {
            return;
        }
        cx.si.lower(FlagOwner::Endpoint, InterfaceFlags::WAIT_DATA);
        cx.oc.control_mut().arm_write_expiry(cx.now);
        cx.wake_task(WakeReason::Io(IoEvents::SEND));
    }
}

impl EndpointOps for ConnectionOps {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn shut_read(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_read(cx) {
            return;
        }
        if cx.oc.control().flags.contains(ChannelFlags::SHUTW) {
            if let Some(conn) = cx.si.endpoint.connection_mut() {
                conn.close(false);
            }
            enter_dis(cx);
        } else if cx.si.flags.contains(InterfaceFlags::NOHALF) {
            self.shut_write(cx);
        } else if let Some(conn) = cx.si.endpoint.connection_mut() {
            conn.shut_read();
        }
    }

    fn shut_write(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_write(cx) {
            return;
        }
        let kill = cx.si.flags.contains(InterfaceFlags::KILL_CONN);
        let state = cx.si.state;
        match state {
            state if state.is_in(SB_CONNECTED) => {
                let flags = cx.si.flags;
                let keep_open = !may_close_now(cx);
                if let Some(conn) = cx.si.endpoint.connection_mut() {
                    if flags.contains(InterfaceFlags::ERR) {
                        // 套接字已出错，直接关闭。
                    } else if flags.contains(InterfaceFlags::NOLINGER) {
                        conn.shut_write(ShutMode::Silent);
                    } else {
                        conn.shut_write(ShutMode::Normal);
                        if keep_open {
                            return;
                        }
                    }
                    conn.close(kill);
                }
                cx.si.transition(InterfaceState::Dis);
            }
            state if state.is_in(SB_PRE_CONNECT) => {
                // 预连接阶段里只有 `CON` 持有正在建立的连接。
                if state.is_in(SB_CONNECTING) {
                    if let Some(conn) = cx.si.endpoint.connection_mut() {
                        conn.close(kill);
                    }
                }
                cx.si.transition(InterfaceState::Dis);
            }
            _ => {}
        }
        finish_shut_write(cx);
    }

    fn check_receive(&self, cx: &mut InterfaceCtx<'_>) {
        if !cx.si.state.is_in(SB_CONNECTING) {
            return;
        }
        if let Err(err) = cx.si.wait_event.schedule(IoEvents::RECV) {
            trace!(side = %cx.si.side, code = err.code(), "receive wake-up not armed");
        }
    }

    fn check_send(&self, cx: &mut InterfaceCtx<'_>) {
        let state = cx.si.state;
        if !state.is_in(SB_CONNECTING) || cx.oc.control().flags.contains(ChannelFlags::SHUTW) {
            return;
        }
        if cx.oc.is_empty() {
            return;
        }

        let (sent, errored) = match cx.si.endpoint.connection_mut() {
            Some(conn) => {
                let sent = conn.send(cx.oc.output());
                (sent, conn.has_error())
            }
            None => return,
        };
        if sent > 0 {
            cx.oc.consume(sent);
            cx.oc
                .control_mut()
                .flags
                .insert(ChannelFlags::WRITE_PARTIAL);
        }

        if errored {
            cx.si.raise(FlagOwner::Endpoint, InterfaceFlags::ERR);
            cx.wake_task(WakeReason::Io(IoEvents::SEND));
            return;
        }

        if cx.oc.is_empty() {
            let oc_flags = cx.oc.control().flags;
            let close_mask = ChannelFlags::SHUTW | ChannelFlags::AUTO_CLOSE | ChannelFlags::SHUTW_NOW;
            if oc_flags.intersection(close_mask) == ChannelFlags::AUTO_CLOSE | ChannelFlags::SHUTW_NOW
                && state.is_in(SB_CONNECTED)
            {
                self.shut_write(cx);
                cx.wake_task(WakeReason::Shutdown);
                return;
            }
            if !oc_flags.intersects(ChannelFlags::SHUTW | ChannelFlags::SHUTW_NOW) {
                cx.si.raise(FlagOwner::Endpoint, InterfaceFlags::WAIT_DATA);
            }
            cx.oc.control_mut().wex = Expiry::Never;
        } else {
            cx.si.lower(FlagOwner::Endpoint, InterfaceFlags::WAIT_DATA);
            cx.oc.control_mut().arm_write_expiry(cx.now);
        }

        let oc_flags = cx.oc.control().flags;
        let drained_or_gone = cx.oc.is_empty() || cx.si.state != InterfaceState::Est;
        if oc_flags.intersects(ChannelFlags::WRITE_ERROR | ChannelFlags::SHUTW)
            || (oc_flags.contains(ChannelFlags::WAKE_WRITE) && drained_or_gone)
        {
            cx.wake_task(WakeReason::Io(IoEvents::SEND));
        }
    }
}

impl EndpointOps for AppletOps {
    fn name(&self) -> &'static str {
        "applet"
    }

    fn shut_read(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_read(cx) {
            return;
        }
        // 关闭读方向时不调用 applet。
        if cx.oc.control().flags.contains(ChannelFlags::SHUTW) {
            cx.si.release_applet();
            enter_dis(cx);
        } else if cx.si.flags.contains(InterfaceFlags::NOHALF) {
            self.shut_write(cx);
        }
    }

    fn shut_write(&self, cx: &mut InterfaceCtx<'_>) {
        if !begin_shut_write(cx) {
            return;
        }
        if let Some(applet) = cx.si.endpoint.applet_mut() {
            applet.wake();
        }
        let state = cx.si.state;
        match state {
            state if state.is_in(SB_CONNECTED) && !may_close_now(cx) => return,
            state if state.is_in(SB_CONNECTED.union(SB_PRE_CONNECT)) => {
                cx.si.release_applet();
                cx.si.transition(InterfaceState::Dis);
            }
            _ => {}
        }
        finish_shut_write(cx);
    }

    fn check_receive(&self, cx: &mut InterfaceCtx<'_>) {
        if let Some(applet) = cx.si.endpoint.applet_mut() {
            applet.on_receive();
        }
    }

    fn check_send(&self, cx: &mut InterfaceCtx<'_>) {
        if cx.si.state != InterfaceState::Est
            || cx.oc.control().flags.contains(ChannelFlags::SHUTW)
        {
            return;
        }
        // 只有在等待数据时才唤醒 applet。
        if !cx.si.tx_blocked() {
            return;
        }
        cx.oc.control_mut().arm_write_expiry(cx.now);
        if !cx.oc.is_empty() {
            if let Some(applet) = cx.si.endpoint.applet_mut() {
                applet.on_send();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::state::Side;
    use crate::test_stubs::{MemChannel, RecordingTask, StubApplet, StubConnection};

    struct Fixture {
        si: StreamInterface,
        ic: MemChannel,
        oc: MemChannel,
        task: RecordingTask,
    }

    impl Fixture {
        fn new(state: InterfaceState) -> Self {
            let mut si = StreamInterface::new(Side::Front);
            si.set_state(state);
            Self {
                si,
                ic: MemChannel::new(64),
                oc: MemChannel::new(64),
                task: RecordingTask::new(),
            }
        }

        fn run(&mut self, op: impl FnOnce(&dyn EndpointOps, &mut InterfaceCtx<'_>)) {
            let ops = self.si.ops;
            let mut cx = InterfaceCtx {
                si: &mut self.si,
                ic: &mut self.ic,
                oc: &mut self.oc,
                task: &self.task,
                now: Instant::now(),
            };
            op(ops, &mut cx);
        }
    }

    #[test]
    fn embedded_shut_read_then_shut_write_disconnects() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.run(|ops, cx| ops.shut_read(cx));
        assert!(fx.ic.control().flags.contains(ChannelFlags::SHUTR));
        assert_eq!(fx.si.state(), InterfaceState::Est, "半关闭保留 EST");
        assert_eq!(fx.task.count(), 1);

        fx.run(|ops, cx| ops.shut_write(cx));
        assert!(fx.oc.control().flags.contains(ChannelFlags::SHUTW));
        assert_eq!(fx.si.state(), InterfaceState::Dis);
        assert!(fx.si.flags().contains(InterfaceFlags::RXBLK_SHUT));

        fx.run(|ops, cx| ops.shut_write(cx));
        assert_eq!(fx.task.count(), 2, "重复关闭不再唤醒");
    }

    #[test]
    fn embedded_shut_write_keeps_half_close_while_reading() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.run(|ops, cx| ops.shut_write(cx));
        assert_eq!(fx.si.state(), InterfaceState::Est);
        assert!(!fx.ic.control().flags.contains(ChannelFlags::SHUTR));
        assert_eq!(fx.task.count(), 0);
    }

    #[test]
    fn nohalf_forwards_read_close_to_write_side() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.raise(FlagOwner::Stream, InterfaceFlags::NOHALF);
        fx.run(|ops, cx| ops.shut_read(cx));
        assert!(fx.oc.control().flags.contains(ChannelFlags::SHUTW));
        assert_eq!(fx.si.state(), InterfaceState::Dis);
    }

    #[test]
    fn embedded_check_send_requires_waiting_for_data() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.oc.inject(b"pending");
        fx.run(|ops, cx| ops.check_send(cx));
        assert_eq!(fx.task.count(), 0);

        fx.si.cant_get();
        fx.run(|ops, cx| ops.check_send(cx));
        assert_eq!(fx.task.wakeups(), vec![WakeReason::Io(IoEvents::SEND)]);
        assert!(!fx.si.tx_blocked());
    }

    #[test]
    fn connection_shut_write_honours_kill_and_nolinger() {
        let conn = StubConnection::new().with_ready(true);
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.endpoint = Endpoint::Connection(conn.boxed());
        fx.si.ops = &CONN_OPS;
        fx.si.raise(FlagOwner::Stream, InterfaceFlags::NOLINGER | InterfaceFlags::KILL_CONN);

        fx.run(|ops, cx| ops.shut_write(cx));
        assert_eq!(conn.shut_writes(), vec![ShutMode::Silent]);
        assert_eq!(conn.closes(), vec![true]);
        assert_eq!(fx.si.state(), InterfaceState::Dis);
        assert!(!fx.si.flags().contains(InterfaceFlags::NOLINGER));
    }

    #[test]
    fn connection_shut_write_before_connect_closes_only_in_con() {
        for (state, closes) in [
            (InterfaceState::Con, vec![true]),
            (InterfaceState::Cer, vec![]),
            (InterfaceState::Que, vec![]),
            (InterfaceState::Tar, vec![]),
        ] {
            let conn = StubConnection::new();
            let mut fx = Fixture::new(state);
            fx.si.endpoint = Endpoint::Connection(conn.boxed());
            fx.si.ops = &CONN_OPS;
            fx.si.must_kill_conn();

            fx.run(|ops, cx| ops.shut_write(cx));
            assert_eq!(conn.closes(), closes, "{state}");
            assert!(conn.shut_writes().is_empty(), "{state}");
            assert_eq!(fx.si.state(), InterfaceState::Dis, "{state}");
        }

        for state in [InterfaceState::Ini, InterfaceState::Req, InterfaceState::Ass] {
            let mut fx = Fixture::new(state);
            fx.si.ops = &CONN_OPS;
            fx.run(|ops, cx| ops.shut_write(cx));
            assert_eq!(fx.si.state(), state, "未进入建连流程的接口保持原状态");
        }
    }

    #[test]
    fn dont_wake_silences_task_wakeups() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.raise(FlagOwner::Stream, InterfaceFlags::DONT_WAKE);
        fx.run(|ops, cx| ops.shut_read(cx));
        assert!(fx.ic.control().flags.contains(ChannelFlags::SHUTR));
        assert_eq!(fx.task.count(), 0);
    }

    #[test]
    fn connection_check_send_pushes_and_reports_errors() {
        let conn = StubConnection::new().with_ready(true);
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.endpoint = Endpoint::Connection(conn.boxed());
        fx.si.ops = &CONN_OPS;
        fx.oc.inject(b"hello");

        fx.run(|ops, cx| ops.check_send(cx));
        assert_eq!(conn.sent(), b"hello".to_vec());
        assert!(fx.oc.is_empty());
        assert!(fx.si.tx_blocked(), "输出耗尽后等待数据");

        conn.set_error(true);
        fx.oc.inject(b"more");
        fx.run(|ops, cx| ops.check_send(cx));
        assert!(fx.si.flags().contains(InterfaceFlags::ERR));
        assert_eq!(fx.task.count(), 1);
    }

    #[test]
    fn connection_check_receive_arms_the_wake_handle_once() {
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.endpoint = Endpoint::Connection(StubConnection::new().boxed());
        fx.si.ops = &CONN_OPS;
        fx.run(|ops, cx| ops.check_receive(cx));
        fx.run(|ops, cx| ops.check_receive(cx));
        assert!(fx.si.wait_event().is_scheduled());
        assert_eq!(fx.si.wait_event.fire(), Ok(IoEvents::RECV));
        assert_eq!(fx.si.wait_event.fire(), Err(crate::error::WakeError::NotScheduled));
    }

    #[test]
    fn applet_release_runs_once_on_full_close() {
        let applet = StubApplet::new("stats");
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.endpoint = Endpoint::Applet(applet.boxed());
        fx.si.ops = &APPLET_OPS;

        fx.run(|ops, cx| ops.shut_read(cx));
        assert_eq!(applet.releases(), 0);
        fx.run(|ops, cx| ops.shut_write(cx));
        assert_eq!(applet.wakes(), 1);
        assert_eq!(applet.releases(), 1);
        assert_eq!(fx.si.state(), InterfaceState::Dis);

        fx.run(|ops, cx| ops.shut_read(cx));
        fx.run(|ops, cx| ops.shut_write(cx));
        assert_eq!(applet.releases(), 1);
    }

    #[test]
    fn applet_entry_points_are_delegated() {
        let applet = StubApplet::new("echo");
        let mut fx = Fixture::new(InterfaceState::Est);
        fx.si.endpoint = Endpoint::Applet(applet.boxed());
        fx.si.ops = &APPLET_OPS;

        fx.run(|ops, cx| ops.check_receive(cx));
        assert_eq!(applet.receives(), 1);

        fx.oc.inject(b"x");
        fx.run(|ops, cx| ops.check_send(cx));
        assert_eq!(applet.sends(), 0, "未等待数据时不唤醒");
        fx.si.cant_get();
        fx.run(|ops, cx| ops.check_send(cx));
        assert_eq!(applet.sends(), 1);
    }
}
