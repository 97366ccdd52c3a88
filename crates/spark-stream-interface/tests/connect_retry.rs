//! `connect_retry` 集成测试：后端建连、失败重试与复用连接的就绪轮询。
//!
//! # 测试目标（Why）
//! - 重试预算必须精确：`conn_retries = N` 时恰好尝试 N 次，随后进入 `CLO` 且错误分类可见；
//! - Fast Open 只允许在首次尝试使用，重试时重复发送早期数据会破坏幂等性；
//! - 缺少端点或能力属于内部错误，不消耗预算也不改变状态。
//!
//! # 结构安排（How）
//! - `drive_to_assigned`：把后端接口从 `INI` 推进到 `ASS`；
//! - 依次覆盖首次建连、预算耗尽、内部错误、建连完成回调与复用连接轮询。

use spark_stream_interface::test_stubs::{Harness, StubConnection};
use spark_stream_interface::{
    Channel, ConnectError, ConnectFlags, ErrorClass, InterfaceSettings, InterfaceState, IoEvents,
    Side, TransportFailure, WakeError, WakeReason,
};

fn drive_to_assigned(h: &mut Harness) {
    h.stream.request_connection(Side::Back).expect("INI → REQ");
    h.stream.assign(Side::Back).expect("REQ → ASS");
}

#[test]
fn first_attempt_with_pending_data_uses_fast_open() {
    let mut h = Harness::default();
    let conn = StubConnection::new();
    h.stream.attach_connection(Side::Back, conn.boxed());
    h.stream.output_channel_mut(Side::Back).inject(b"GET / HTTP/1.1\r\n");
    drive_to_assigned(&mut h);

    h.stream.connect(Side::Back).expect("建连成功");

    assert_eq!(
        conn.connect_calls(),
        vec![ConnectFlags::HAS_DATA | ConnectFlags::CAN_USE_TFO]
    );
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Con);
    assert!(h.stream.interface(Side::Back).wait_event().is_scheduled());
}

#[test]
fn budget_is_spent_exactly_then_interface_closes() {
    let mut h = Harness::default();
    let conn = StubConnection::new();
    h.stream.attach_connection(Side::Back, conn.boxed());
    drive_to_assigned(&mut h);

    let reset = ConnectError::transport(TransportFailure::Reset);
    let mut attempts = 0;
    while h.stream.interface(Side::Back).state() == InterfaceState::Ass {
        h.stream.connect(Side::Back).expect("建连原语本身成功");
        attempts += 1;
        assert_eq!(
            h.stream.connect_failed(Side::Back, reset.clone()),
            InterfaceState::Cer
        );
        h.stream.retry(Side::Back);
    }

    let back = h.stream.interface(Side::Back);
    assert_eq!(attempts, 3);
    assert_eq!(back.state(), InterfaceState::Clo);
    assert_eq!(back.conn_retries(), 0);
    assert_eq!(back.err_type().class(), Some(ErrorClass::Transport));
    assert_eq!(back.last_connect_error(), Some(&reset));

    let calls = conn.connect_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].contains(ConnectFlags::CAN_USE_TFO));
    assert!(
        calls[1..]
            .iter()
            .all(|flags| !flags.contains(ConnectFlags::CAN_USE_TFO)),
        "重试不得使用 Fast Open"
    );
}

#[test]
fn missing_connection_is_internal_and_free() {
    let mut h = Harness::default();
    drive_to_assigned(&mut h);

    let err = h.stream.connect(Side::Back).expect_err("未绑定连接");
    assert_eq!(err.class(), ErrorClass::Internal);
    let back = h.stream.interface(Side::Back);
    assert_eq!(back.state(), InterfaceState::Ass);
    assert_eq!(back.conn_retries(), 3);
    assert!(back.err_type().is_empty());
}

#[test]
fn connection_without_control_layer_is_internal() {
    let mut h = Harness::default();
    let conn = StubConnection::new().without_caps();
    h.stream.attach_connection(Side::Back, conn.boxed());
    drive_to_assigned(&mut h);

    let err = h.stream.connect(Side::Back).expect_err("无控制层");
    assert_eq!(err.code(), "stream_interface.connect.internal");
    assert!(conn.connect_calls().is_empty());
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Ass);
}

#[test]
fn resource_failure_is_classified_as_exhaustion() {
    let settings = InterfaceSettings {
        conn_retries: 1,
        ..InterfaceSettings::default()
    };
    let mut h = Harness::new(settings);
    h.stream
        .attach_connection(Side::Back, StubConnection::new().boxed());
    drive_to_assigned(&mut h);

    h.stream.connect(Side::Back).expect("建连");
    h.stream.connect_failed(Side::Back, ConnectError::Resource);
    assert_eq!(h.stream.retry(Side::Back), InterfaceState::Clo);
    assert_eq!(
        h.stream.interface(Side::Back).err_type().class(),
        Some(ErrorClass::ResourceExhausted)
    );
}

#[test]
fn completion_wakeup_moves_con_to_rdy() {
    let mut h = Harness::default();
    let conn = StubConnection::new();
    h.stream.attach_connection(Side::Back, conn.boxed());
    drive_to_assigned(&mut h);
    h.stream.connect(Side::Back).expect("建连");

    conn.set_ready(true);
    assert_eq!(h.stream.io_callback(Side::Back), Ok(IoEvents::SEND));
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Rdy);
    assert_eq!(h.task.wakeups(), vec![WakeReason::Io(IoEvents::SEND)]);

    h.stream.establish(Side::Back).expect("RDY → EST");
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Est);
}

#[test]
fn reused_connection_polls_multiplexer_within_budget() {
    let mut h = Harness::default();
    let conn = StubConnection::new().with_ready(true);
    h.stream.attach_connection(Side::Back, conn.boxed());
    drive_to_assigned(&mut h);

    h.stream.connect(Side::Back).expect("复用");
    assert!(conn.connect_calls().is_empty());
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Con);

    assert_eq!(h.stream.poll_reused_connection(Side::Back), Ok(InterfaceState::Con));
    assert_eq!(h.stream.poll_reused_connection(Side::Back), Ok(InterfaceState::Con));
    let err = h
        .stream
        .poll_reused_connection(Side::Back)
        .expect_err("轮询次数耗尽");
    assert_eq!(err, ConnectError::transport(TransportFailure::MuxNotReady));
    assert_eq!(h.stream.interface(Side::Back).state(), InterfaceState::Cer);
    assert_eq!(conn.mux_queries(), 4);
}

#[test]
fn reused_connection_becomes_ready_when_multiplexer_confirms() {
    let mut h = Harness::default();
    let conn = StubConnection::new().with_ready(true);
    h.stream.attach_connection(Side::Back, conn.boxed());
    drive_to_assigned(&mut h);
    h.stream.connect(Side::Back).expect("复用");

    conn.set_mux_ready(true);
    assert_eq!(h.stream.poll_reused_connection(Side::Back), Ok(InterfaceState::Rdy));
    assert_eq!(h.stream.poll_reused_connection(Side::Back), Ok(InterfaceState::Rdy));
}

#[test]
fn out_of_order_reports_are_ignored() {
    let mut h = Harness::default();
    h.stream
        .attach_connection(Side::Back, StubConnection::new().boxed());
    drive_to_assigned(&mut h);

    let refused = ConnectError::transport(TransportFailure::Refused);
    assert_eq!(h.stream.connect_failed(Side::Back, refused), InterfaceState::Ass);
    assert_eq!(h.stream.retry(Side::Back), InterfaceState::Ass);
    assert!(!h.stream.tarpit_expired(Side::Back));
    assert_eq!(h.stream.interface(Side::Back).conn_retries(), 3);
}

#[test]
fn failed_attempt_disarms_completion_wakeup() {
    let mut h = Harness::default();
    h.stream
        .attach_connection(Side::Back, StubConnection::new().boxed());
    drive_to_assigned(&mut h);

    h.stream.connect(Side::Back).expect("建连");
    assert_eq!(h.task.armed(), vec![(Side::Back, IoEvents::SEND)]);

    h.stream
        .connect_failed(Side::Back, ConnectError::transport(TransportFailure::TimedOut));
    assert!(!h.stream.interface(Side::Back).wait_event().is_scheduled());

    assert_eq!(h.stream.retry(Side::Back), InterfaceState::Ass);
    assert_eq!(h.stream.io_callback(Side::Back), Err(WakeError::NotScheduled));
    assert_eq!(h.task.count(), 0);

    h.stream.connect(Side::Back).expect("重试建连");
    assert_eq!(h.task.armed().len(), 2, "重试重新布防");
}
