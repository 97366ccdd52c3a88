//! 测试桩：内存通道、可编程连接、计数 applet、记录型流任务与手动时钟。
//!
//! ## 设计目的（Why）
//! - 单元测试与 `tests/` 下的集成测试共用同一套桩，断言口径一致；
//! - 每个桩都以 `Arc` 共享内部状态：交给 [`Stream`] 的是一个克隆，测试手里保留另一个用于观测。
//!
//! ## 使用方式（How）
//! ```
//! use spark_stream_interface::test_stubs::{Harness, StubConnection};
//! use spark_stream_interface::{InterfaceState, Side};
//!
//! let mut h = Harness::default();
//! let conn = StubConnection::new();
//! h.stream.attach_connection(Side::Back, conn.boxed());
//! h.stream.interface_mut(Side::Back).set_state(InterfaceState::Ass);
//! h.stream.connect(Side::Back).expect("建连");
//! assert_eq!(conn.connect_calls().len(), 1);
//! ```
//!
//! 这里的 `expect` 只用于锁中毒，与 `MockClock` 的处理一致。

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::channel::{BufferWaiter, Channel, ChannelControl};
use crate::config::InterfaceSettings;
use crate::endpoint::{Applet, ConnectFlags, Connection, ControlCaps, MuxStatus, Session, ShutMode};
use crate::error::ConnectError;
use crate::stream::Stream;
use crate::time::Clock;
use crate::state::Side;
use crate::wake::{IoEvents, IoTasklet, StreamTask, WakeReason};

/// 有容量上限的内存通道。
///
/// - `output` 是已调度、等待端点发送的数据；
/// - `input` 是端点刚推入、尚未转发的数据，`truncate` 只丢弃这一部分；
/// - 容量按两者之和计算。
#[derive(Debug)]
pub struct MemChannel {
    control: ChannelControl,
    output: BytesMut,
    input: BytesMut,
    capacity: usize,
    alloc_ok: bool,
    waiters: Vec<BufferWaiter>,
}

impl MemChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            control: ChannelControl::default(),
            output: BytesMut::with_capacity(capacity),
            input: BytesMut::new(),
            capacity,
            alloc_ok: true,
            waiters: Vec::new(),
        }
    }

    pub fn with_control(mut self, control: ChannelControl) -> Self {
        self.control = control;
        self
    }

    /// 让后续的缓冲区申请成功或失败。
    pub fn set_alloc_ok(&mut self, ok: bool) {
        self.alloc_ok = ok;
    }

    pub fn with_alloc_ok(mut self, ok: bool) -> Self {
        self.alloc_ok = ok;
        self
    }

    /// 模拟端点推入数据，返回实际接收的字节数。
    pub fn push_input(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.room());
        self.input.extend_from_slice(&data[..n]);
        n
    }

    /// 尚未转发的输入数据。
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn waiters(&self) -> &[BufferWaiter] {
        &self.waiters
    }

    fn room(&self) -> usize {
        self.capacity
            .saturating_sub(self.output.len() + self.input.len())
    }
}

impl Channel for MemChannel {
    fn control(&self) -> &ChannelControl {
        &self.control
    }

    fn control_mut(&mut self) -> &mut ChannelControl {
        &mut self.control
    }

    fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    fn may_receive(&self) -> bool {
        self.room() > 0
    }

    fn alloc_buffer(&mut self, waiter: BufferWaiter) -> bool {
        if !self.alloc_ok && !self.waiters.contains(&waiter) {
            self.waiters.push(waiter);
        }
        self.alloc_ok
    }

    fn output(&self) -> &[u8] {
        &self.output
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.output.len());
        self.output.advance(n);
    }

    fn erase(&mut self) {
        self.output.clear();
        self.input.clear();
    }

    fn truncate(&mut self) {
        self.input.clear();
    }

    fn inject(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.room());
        self.output.extend_from_slice(&data[..n]);
        n
    }
}

#[derive(Debug)]
struct ConnState {
    caps: ControlCaps,
    ctrl_ready: bool,
    xprt_ready: bool,
    mux_ready: bool,
    connect_results: VecDeque<Result<(), ConnectError>>,
    connect_calls: Vec<ConnectFlags>,
    src: Option<SocketAddr>,
    dst: Option<SocketAddr>,
    src_lookups: usize,
    dst_lookups: usize,
    mux_queries: usize,
    shut_reads: usize,
    shut_writes: Vec<ShutMode>,
    closes: Vec<bool>,
    sent: Vec<u8>,
    send_limit: Option<usize>,
    error: bool,
}

/// 可编程的网络连接桩。
///
/// 默认具备控制层与建连能力、尚未就绪、建连总是成功；
/// 通过 [`StubConnection::push_connect_result`] 预置逐次建连结果。
#[derive(Clone, Debug)]
pub struct StubConnection {
    state: Arc<Mutex<ConnState>>,
}

impl Default for StubConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl StubConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnState {
                caps: ControlCaps::CONTROL | ControlCaps::CONNECT,
                ctrl_ready: false,
                xprt_ready: false,
                mux_ready: false,
                connect_results: VecDeque::new(),
                connect_calls: Vec::new(),
                src: None,
                dst: None,
                src_lookups: 0,
                dst_lookups: 0,
                mux_queries: 0,
                shut_reads: 0,
                shut_writes: Vec::new(),
                closes: Vec::new(),
                sent: Vec::new(),
                send_limit: None,
                error: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().expect("stub connection lock poisoned")
    }

    /// 交给流接口持有的克隆。
    pub fn boxed(&self) -> Box<dyn Connection> {
        Box::new(self.clone())
    }

    /// 控制层与传输层同时就绪（或同时未就绪）。
    pub fn with_ready(self, ready: bool) -> Self {
        self.set_ready(ready);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        let mut state = self.lock();
        state.ctrl_ready = ready;
        state.xprt_ready = ready;
    }

    pub fn with_mux_ready(self, ready: bool) -> Self {
        self.set_mux_ready(ready);
        self
    }

    pub fn set_mux_ready(&self, ready: bool) {
        self.lock().mux_ready = ready;
    }

    pub fn with_caps(self, caps: ControlCaps) -> Self {
        self.lock().caps = caps;
        self
    }

    /// 去掉全部控制层能力，模拟未挂载控制层的连接。
    pub fn without_caps(self) -> Self {
        self.with_caps(ControlCaps::empty())
    }

    pub fn with_src(self, addr: SocketAddr) -> Self {
        self.lock().src = Some(addr);
        self
    }

    pub fn with_dst(self, addr: SocketAddr) -> Self {
        self.lock().dst = Some(addr);
        self
    }

    /// 每次 `send` 最多写出 `limit` 字节。
    pub fn with_send_limit(self, limit: usize) -> Self {
        self.lock().send_limit = Some(limit);
        self
    }

    /// 预置下一次建连的结果；队列为空时建连成功。
    pub fn push_connect_result(&self, result: Result<(), ConnectError>) {
        self.lock().connect_results.push_back(result);
    }

    pub fn set_error(&self, error: bool) {
        self.lock().error = error;
    }

    /// 每次建连调用收到的标志。
    pub fn connect_calls(&self) -> Vec<ConnectFlags> {
        self.lock().connect_calls.clone()
    }

    pub fn src_lookups(&self) -> usize {
        self.lock().src_lookups
    }

    pub fn dst_lookups(&self) -> usize {
        self.lock().dst_lookups
    }

    pub fn mux_queries(&self) -> usize {
        self.lock().mux_queries
    }

    pub fn shut_reads(&self) -> usize {
        self.lock().shut_reads
    }

    pub fn shut_writes(&self) -> Vec<ShutMode> {
        self.lock().shut_writes.clone()
    }

    /// 每次 `close` 的 `kill` 参数。
    pub fn closes(&self) -> Vec<bool> {
        self.lock().closes.clone()
    }

    pub fn sent(&self) -> Vec<u8> {
        self.lock().sent.clone()
    }
}

impl Connection for StubConnection {
    fn control_caps(&self) -> ControlCaps {
        self.lock().caps
    }

    fn connect(&mut self, flags: ConnectFlags) -> Result<(), ConnectError> {
        let mut state = self.lock();
        state.connect_calls.push(flags);
        state.connect_results.pop_front().unwrap_or(Ok(()))
    }

    fn is_ctrl_ready(&self) -> bool {
        self.lock().ctrl_ready
    }

    fn is_xprt_ready(&self) -> bool {
        self.lock().xprt_ready
    }

    fn mux_status(&self) -> MuxStatus {
        let mut state = self.lock();
        state.mux_queries += 1;
        if state.mux_ready {
            MuxStatus::READY
        } else {
            MuxStatus::empty()
        }
    }

    fn src(&self) -> Option<SocketAddr> {
        let mut state = self.lock();
        state.src_lookups += 1;
        state.src
    }

    fn dst(&self) -> Option<SocketAddr> {
        let mut state = self.lock();
        state.dst_lookups += 1;
        state.dst
    }

    fn shut_read(&mut self) {
        self.lock().shut_reads += 1;
    }

    fn shut_write(&mut self, mode: ShutMode) {
        self.lock().shut_writes.push(mode);
    }

    fn close(&mut self, kill: bool) {
        self.lock().closes.push(kill);
    }

    fn send(&mut self, data: &[u8]) -> usize {
        let mut state = self.lock();
        if state.error {
            return 0;
        }
        let n = state.send_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.sent.extend_from_slice(&data[..n]);
        n
    }

    fn has_error(&self) -> bool {
        self.lock().error
    }
}

#[derive(Debug, Default)]
struct AppletProbe {
    receives: AtomicUsize,
    sends: AtomicUsize,
    wakes: AtomicUsize,
    releases: AtomicUsize,
}

/// 只计数各入口调用次数的 applet。
#[derive(Clone, Debug)]
pub struct StubApplet {
    name: String,
    probe: Arc<AppletProbe>,
}

impl StubApplet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe: Arc::default(),
        }
    }

    pub fn boxed(&self) -> Box<dyn Applet> {
        Box::new(self.clone())
    }

    pub fn receives(&self) -> usize {
        self.probe.receives.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.probe.sends.load(Ordering::SeqCst)
    }

    pub fn wakes(&self) -> usize {
        self.probe.wakes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.probe.releases.load(Ordering::SeqCst)
    }
}

impl Applet for StubApplet {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_receive(&mut self) {
        self.probe.receives.fetch_add(1, Ordering::SeqCst);
    }

    fn on_send(&mut self) {
        self.probe.sends.fetch_add(1, Ordering::SeqCst);
    }

    fn wake(&mut self) {
        self.probe.wakes.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 记录地址查询次数的会话。
#[derive(Clone, Debug, Default)]
pub struct CountingSession {
    src: Option<SocketAddr>,
    dst: Option<SocketAddr>,
    src_lookups: Arc<AtomicUsize>,
    dst_lookups: Arc<AtomicUsize>,
}

impl CountingSession {
    pub fn new(src: Option<SocketAddr>, dst: Option<SocketAddr>) -> Self {
        Self {
            src,
            dst,
            ..Self::default()
        }
    }

    pub fn src_lookups(&self) -> usize {
        self.src_lookups.load(Ordering::SeqCst)
    }

    pub fn dst_lookups(&self) -> usize {
        self.dst_lookups.load(Ordering::SeqCst)
    }
}

impl Session for CountingSession {
    fn src(&self) -> Option<SocketAddr> {
        self.src_lookups.fetch_add(1, Ordering::SeqCst);
        self.src
    }

    fn dst(&self) -> Option<SocketAddr> {
        self.dst_lookups.fetch_add(1, Ordering::SeqCst);
        self.dst
    }
}

/// 记录每次唤醒原因的流任务，同时充当 IO tasklet 记录每次布防。
#[derive(Clone, Debug, Default)]
pub struct RecordingTask {
    wakeups: Arc<Mutex<Vec<WakeReason>>>,
    armed: Arc<Mutex<Vec<(Side, IoEvents)>>>,
}

impl RecordingTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.wakeups().len()
    }

    pub fn wakeups(&self) -> Vec<WakeReason> {
        self.wakeups
            .lock()
            .expect("recording task lock poisoned")
            .clone()
    }

    /// 按顺序列出 tasklet 收到的布防通知。
    pub fn armed(&self) -> Vec<(Side, IoEvents)> {
        self.armed
            .lock()
            .expect("recording task lock poisoned")
            .clone()
    }
}

impl StreamTask for RecordingTask {
    fn wakeup(&self, reason: WakeReason) {
        self.wakeups
            .lock()
            .expect("recording task lock poisoned")
            .push(reason);
    }
}

impl IoTasklet for RecordingTask {
    fn schedule(&self, side: Side, events: IoEvents) {
        self.armed
            .lock()
            .expect("recording task lock poisoned")
            .push((side, events));
    }
}

/// 手动推进的虚拟时钟，克隆之间共享同一时间线。
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::default(),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock().expect("manual clock lock poisoned");
        *elapsed = elapsed.saturating_add(delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().expect("manual clock lock poisoned")
    }
}

/// 一条装配好桩的流，以及测试侧保留的观测句柄。
pub struct Harness {
    pub stream: Stream,
    pub task: RecordingTask,
    pub clock: ManualClock,
    pub session: CountingSession,
}

impl Harness {
    /// 通道容量默认 1024 字节。
    pub fn new(settings: InterfaceSettings) -> Self {
        Self::with_session(settings, CountingSession::default())
    }

    pub fn with_session(settings: InterfaceSettings, session: CountingSession) -> Self {
        Self::with_channels(settings, session, MemChannel::new(1024), MemChannel::new(1024))
    }

    pub fn with_channels(
        settings: InterfaceSettings,
        session: CountingSession,
        req: MemChannel,
        res: MemChannel,
    ) -> Self {
        let task = RecordingTask::new();
        let clock = ManualClock::new();
        let stream = Stream::new(
            settings,
            Box::new(session.clone()),
            Box::new(req),
            Box::new(res),
            Box::new(task.clone()),
            Arc::new(task.clone()),
            Arc::new(clock.clone()),
        );
        Self {
            stream,
            task,
            clock,
            session,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(InterfaceSettings::default())
    }
}
