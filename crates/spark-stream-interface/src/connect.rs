//! 建连与重试控制器。
//!
//! ## 设计目标（Why）
//! - 后端接口需要建立新连接或确认连接池中复用的连接可用；
//! - 传输层错误在本地按预算重试，其余错误立即上报给流层。
//!
//! ## 状态推进（How）
//! ```text
//! INI --request_connection--> REQ --queue--> QUE --assign--> ASS --connect--> CON / RDY
//!                              \-----------assign-----------/
//! CON --connect_failed--> CER --retry--> ASS | TAR (立即拒绝) | REQ (重新分派) | CLO (预算耗尽)
//! TAR --tarpit_expired--> ASS
//! CON --poll_reused_connection--> RDY | CON | CER (多路复用器始终未就绪)
//! RDY --establish--> EST
//! ```
//!
//! ## 契约说明（What）
//! - Fast Open 只在首次尝试时允许（剩余预算等于配置上限）；
//! - 连续 `conn_retries` 次传输失败后接口进入 `CLO`，错误分类保留在 `err_type`；
//! - 非法的状态推进返回 [`ConnectError::Internal`]，不改变状态、不消耗预算。

use tracing::{debug, trace};

use crate::endpoint::{ConnectFlags, ControlCaps, MuxStatus};
use crate::error::{ConnectError, ErrorType, TransportFailure};
use crate::flags::InterfaceFlags;
use crate::state::{InterfaceState, Side};
use crate::stream::Stream;
use crate::time::Expiry;
use crate::wake::IoEvents;

impl Stream {
    fn expect_state(
        &self,
        side: Side,
        allowed: &[InterfaceState],
        reason: &'static str,
    ) -> Result<(), ConnectError> {
        let state = self.interface(side).state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            debug!(side = %side, state = %state, reason, "connect controller refused transition");
            Err(ConnectError::internal(reason))
        }
    }

    /// `INI → REQ`：请求一条连接。
    pub fn request_connection(&mut self, side: Side) -> Result<(), ConnectError> {
        self.expect_state(side, &[InterfaceState::Ini], "connection requested outside INI")?;
        self.interface_mut(side).transition(InterfaceState::Req);
        Ok(())
    }

    /// `REQ → QUE`：暂无服务器槽位，进入排队。
    pub fn queue(&mut self, side: Side) -> Result<(), ConnectError> {
        self.expect_state(side, &[InterfaceState::Req], "queueing outside REQ")?;
        self.interface_mut(side).transition(InterfaceState::Que);
        Ok(())
    }

    /// `REQ | QUE → ASS`：已分配服务器。
    pub fn assign(&mut self, side: Side) -> Result<(), ConnectError> {
        self.expect_state(
            side,
            &[InterfaceState::Req, InterfaceState::Que],
            "server assigned outside REQ/QUE",
        )?;
        self.interface_mut(side).transition(InterfaceState::Ass);
        Ok(())
    }

    /// 建立或确认复用 `side` 接口上绑定的连接。
    ///
    /// # 教案式说明
    /// - **前置条件**：接口绑定了连接端点，且连接具备控制层与建连能力，否则返回内部错误、状态不变；
    /// - **执行逻辑**：
    ///   1. 输出通道非空时附带 `HAS_DATA`；剩余预算等于配置上限时附带 `CAN_USE_TFO`；
    ///   2. 连接尚未同时控制就绪与传输就绪时调用建连原语，失败原样返回、状态不变，成功进入 `CON`；
    ///   3. 否则视为复用：多路复用器报告 `READY` 则直接进入 `RDY`，否则进入 `CON` 并布置有限次的就绪轮询；
    ///   4. 进入 `CON` 时布防发送方向的唤醒，建连完成后由 [`Stream::io_callback`] 推进到 `RDY`；
    ///   5. 接口要求记录源地址时顺带解析源地址。
    /// - **后置条件**：成功时状态为 `CON` 或 `RDY`，不存在部分成功。
    pub fn connect(&mut self, side: Side) -> Result<(), ConnectError> {
        let max_retries = self.settings.conn_retries;
        let mux_polls = self.settings.mux_ready_polls;

        let (cx, _) = self.context(side);
        let has_data = !cx.oc.is_empty();
        let si = cx.si;
        if si.state.is_closed() {
            return Err(ConnectError::internal("interface already closed"));
        }
        let retries = si.conn_retries;

        let Some(conn) = si.endpoint.connection_mut() else {
            return Err(ConnectError::internal("no connection bound"));
        };
        let caps = conn.control_caps();
        if !caps.contains(ControlCaps::CONTROL) {
            return Err(ConnectError::internal("connection has no control layer"));
        }
        if !caps.contains(ControlCaps::CONNECT) {
            return Err(ConnectError::internal("control layer cannot connect"));
        }

        let mut flags = ConnectFlags::empty();
        flags.set(ConnectFlags::HAS_DATA, has_data);
        flags.set(ConnectFlags::CAN_USE_TFO, retries == max_retries);

        let (next, polls) = if !conn.is_ctrl_ready() || !conn.is_xprt_ready() {
            conn.connect(flags).inspect_err(|err| {
                debug!(side = %side, retries, code = err.code(), "transport connect failed");
            })?;
            (InterfaceState::Con, 0)
        } else if conn.mux_status().contains(MuxStatus::READY) {
            (InterfaceState::Rdy, 0)
        } else {
            (InterfaceState::Con, mux_polls)
        };

        debug!(side = %side, retries, flags = ?flags, to = %next, "connect attempt");
        si.mux_polls_left = polls;
        si.transition(next);
        if next == InterfaceState::Con && polls == 0 {
            // 建连完成由发送方向的唤醒报告。
            if let Err(err) = si.wait_event.schedule(IoEvents::SEND) {
                trace!(side = %side, code = err.code(), "connect wake-up not armed");
            }
        }
        let capture_source = si.flags.contains(InterfaceFlags::SRC_ADDR);

        if capture_source && !self.get_source(side) {
            trace!(side = %side, "source address not yet available");
        }
        Ok(())
    }

    /// `CON → CER`：记录建连失败的类别，撤销建连时布防的发送唤醒，等待 [`Stream::retry`]
    /// 决定去向。
    ///
    /// 不在 `CON` 时忽略并返回当前状态。
    pub fn connect_failed(&mut self, side: Side, err: ConnectError) -> InterfaceState {
        let si = self.interface_mut(side);
        if si.state != InterfaceState::Con {
            trace!(side = %side, state = %si.state, "connect failure ignored outside CON");
            return si.state;
        }
        debug!(side = %side, code = err.code(), retries = si.conn_retries, "connection attempt failed");
        si.add_error(err.error_type());
        si.last_error = Some(err);
        si.mux_polls_left = 0;
        si.exp = Expiry::Never;
        if si.wait_event.disarm() {
            trace!(side = %side, "pending connect wake-up disarmed");
        }
        si.transition(InterfaceState::Cer);
        si.state
    }

    /// 从 `CER` 出发决定下一步。
    ///
    /// - 扣减一次预算；归零时进入 `CLO`，保留已累积的错误分类；
    /// - 最后一次重试且允许重新分派时回到 `REQ`；
    /// - 上一次失败是立即拒绝时进入 `TAR`，并设置 tarpit 到期时间；
    /// - 其余情况回到 `ASS`。
    ///
    /// 不在 `CER` 时忽略并返回当前状态。
    pub fn retry(&mut self, side: Side) -> InterfaceState {
        let now = self.clock.now();
        let redispatch = self.settings.redispatch;
        let tarpit = self.settings.tarpit_delay();

        let si = self.interface_mut(side);
        if si.state != InterfaceState::Cer {
            return si.state;
        }
        si.conn_retries = si.conn_retries.saturating_sub(1);
        if si.conn_retries == 0 {
            if si.err_type.is_empty() {
                si.add_error(ErrorType::CONN_ERR);
            }
            debug!(side = %side, err_type = ?si.err_type, "connect retries exhausted");
            si.transition(InterfaceState::Clo);
            return si.state;
        }

        let refused = si
            .last_error
            .as_ref()
            .is_some_and(ConnectError::is_immediate_refusal);
        let next = if redispatch && si.conn_retries == 1 {
            InterfaceState::Req
        } else if refused {
            si.exp = Expiry::At(now + tarpit);
            InterfaceState::Tar
        } else {
            InterfaceState::Ass
        };
        debug!(side = %side, retries = si.conn_retries, to = %next, "retrying connection");
        si.transition(next);
        next
    }

    /// `TAR → ASS`：tarpit 到期后返回 `true`。
    pub fn tarpit_expired(&mut self, side: Side) -> bool {
        let now = self.clock.now();
        let si = self.interface_mut(side);
        if si.state != InterfaceState::Tar || !si.exp.is_expired(now) {
            return false;
        }
        si.exp = Expiry::Never;
        si.transition(InterfaceState::Ass);
        true
    }

    /// 复用连接在 `CON` 下重新查询多路复用器是否就绪。
    ///
    /// - 就绪：进入 `RDY`；
    /// - 未就绪且仍有轮询次数：保持 `CON`；
    /// - 次数耗尽：按 [`TransportFailure::MuxNotReady`] 进入 `CER` 并返回该错误。
    ///
    /// 没有待轮询的复用连接时原样返回当前状态。
    pub fn poll_reused_connection(&mut self, side: Side) -> Result<InterfaceState, ConnectError> {
        let si = self.interface_mut(side);
        if si.state != InterfaceState::Con || si.mux_polls_left == 0 {
            return Ok(si.state);
        }
        let ready = match si.endpoint.connection() {
            Some(conn) => conn.mux_status().contains(MuxStatus::READY),
            None => return Err(ConnectError::internal("no connection bound")),
        };
        if ready {
            si.mux_polls_left = 0;
            si.transition(InterfaceState::Rdy);
            return Ok(InterfaceState::Rdy);
        }

        si.mux_polls_left -= 1;
        if si.mux_polls_left > 0 {
            trace!(side = %side, polls_left = si.mux_polls_left, "multiplexer not ready yet");
            return Ok(InterfaceState::Con);
        }
        let err = ConnectError::transport(TransportFailure::MuxNotReady);
        self.connect_failed(side, err.clone());
        Err(err)
    }

    /// `RDY → EST`：流逻辑确认连接可用。
    pub fn establish(&mut self, side: Side) -> Result<(), ConnectError> {
        self.expect_state(side, &[InterfaceState::Rdy], "establish outside RDY")?;
        let si = self.interface_mut(side);
        si.exp = Expiry::Never;
        si.transition(InterfaceState::Est);
        Ok(())
    }
}
