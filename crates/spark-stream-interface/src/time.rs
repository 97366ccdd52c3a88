//! 时间来源与到期时间点。
//!
//! - 状态机从不直接读取系统时钟，所有“当前时间”都经由 [`Clock`] 注入，测试中可替换为
//!   [`ManualClock`](crate::test_stubs::ManualClock) 推进虚拟时间；
//! - [`Expiry`] 表达“某个绝对时刻”或“永不到期”，取代哨兵值。

use std::time::{Duration, Instant};

/// 可注入的单调时钟。
///
/// # 契约说明（What）
/// - `now` 必须单调不减；
/// - 推荐以 `Arc<dyn Clock>` 形式在 [`Stream`](crate::Stream) 中共享。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;
}

/// 直接委托给 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 绝对到期时间，或永不到期。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Expiry {
    #[default]
    Never,
    At(Instant),
}

impl Expiry {
    /// 若设置了超时则返回 `now + timeout`，否则永不到期。
    pub fn add_ifset(now: Instant, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Expiry::At(now + timeout),
            None => Expiry::Never,
        }
    }

    pub const fn is_set(self) -> bool {
        matches!(self, Expiry::At(_))
    }

    /// `now` 是否已达到或越过到期时刻；`Never` 永远返回 `false`。
    pub fn is_expired(self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(deadline) => deadline <= now,
        }
    }
}
