//! 唤醒原语。
//!
//! ## 设计目标（Why）
//! - 每个流接口持有一个单次触发的唤醒句柄 [`WakeHandle`]，由端点层或流层“布防”，
//!   调度器保证同一句柄同一时刻至多一次待执行的回调；
//! - 拆除时先取消句柄再释放资源，拆除后触发的唤醒必须被拒绝而不是被分派。
//!
//! ## 状态机（How）
//! ```text
//! Idle --schedule--> Scheduled --fire/disarm--> Idle
//!   \                    |
//!    +------cancel-------+-----> Cancelled (终态)
//! ```
//! - 已布防时再次 `schedule` 只合并事件掩码，不产生第二次回调；
//! - `Cancelled` 下的 `schedule`/`fire` 都返回 [`WakeError::Cancelled`]。
//!
//! 句柄绑定一个 [`IoTasklet`]：只有 `Idle → Scheduled` 这条边会通知它，已布防时的合并与
//! 触发都不会重复通知。流任务本身通过 [`StreamTask`] 注入，本模块不设计调度器。

use core::fmt;
use std::sync::Arc;

use crate::error::WakeError;
use crate::macros::bit_set;
use crate::state::Side;

bit_set! {
    /// 唤醒时请求的就绪事件。
    pub struct IoEvents: u8 {
        const RECV = 1 << 0;
        const SEND = 1 << 1;
    }
}

/// 唤醒流任务的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeReason {
    /// 端点产生了 IO 事件或需要流任务重新评估通道。
    Io(IoEvents),
    /// 某个方向被关闭。
    Shutdown,
}

/// 持有两个流接口的流任务。
///
/// 调度器负责把 `wakeup` 转换为一次任务执行；实现者必须容忍重复唤醒。
pub trait StreamTask {
    fn wakeup(&self, reason: WakeReason);
}

/// 承载接口 IO 回调的可调度单元。
///
/// # 契约说明（What）
/// - 句柄每次从空闲进入已布防时调用一次 `schedule`；
/// - 调度器随后应对同一 `side` 调用 [`Stream::io_callback`](crate::Stream::io_callback)，
///   回调被拒绝（句柄已撤防或已取消）时丢弃即可。
pub trait IoTasklet {
    fn schedule(&self, side: Side, events: IoEvents);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WakeState {
    Idle,
    Scheduled(IoEvents),
    Cancelled,
}

/// 流接口的单次唤醒句柄。
pub struct WakeHandle {
    state: WakeState,
    fired: u64,
    tasklet: Option<(Side, Arc<dyn IoTasklet>)>,
}

impl WakeHandle {
    /// 未绑定 tasklet 的句柄，只记录状态。
    pub const fn new() -> Self {
        Self {
            state: WakeState::Idle,
            fired: 0,
            tasklet: None,
        }
    }

    /// 绑定到 `side` 接口的 tasklet。
    pub fn bound(side: Side, tasklet: Arc<dyn IoTasklet>) -> Self {
        Self {
            tasklet: Some((side, tasklet)),
            ..Self::new()
        }
    }

    pub const fn is_bound(&self) -> bool {
        self.tasklet.is_some()
    }

    /// 以事件掩码布防句柄。
    ///
    /// 返回 `Ok(true)` 表示本次调用新产生了一个待执行回调，`Ok(false)` 表示已有回调待执行，
    /// 事件被合并。
    pub fn schedule(&mut self, events: IoEvents) -> Result<bool, WakeError> {
        match self.state {
            WakeState::Cancelled => Err(WakeError::Cancelled),
            WakeState::Scheduled(pending) => {
                self.state = WakeState::Scheduled(pending | events);
                Ok(false)
            }
            WakeState::Idle => {
                self.state = WakeState::Scheduled(events);
                if let Some((side, tasklet)) = &self.tasklet {
                    tasklet.schedule(*side, events);
                }
                Ok(true)
            }
        }
    }

    /// 触发待执行的回调，返回累积的事件并回到 `Idle`。
    pub fn fire(&mut self) -> Result<IoEvents, WakeError> {
        match self.state {
            WakeState::Cancelled => Err(WakeError::Cancelled),
            WakeState::Idle => Err(WakeError::NotScheduled),
            WakeState::Scheduled(events) => {
                self.state = WakeState::Idle;
                self.fired += 1;
                Ok(events)
            }
        }
    }

    /// 撤销待执行的回调并回到 `Idle`；已派发给调度器的回调届时会以
    /// [`WakeError::NotScheduled`] 被拒绝。返回此前是否处于布防状态。
    pub fn disarm(&mut self) -> bool {
        if self.is_scheduled() {
            self.state = WakeState::Idle;
            true
        } else {
            false
        }
    }

    /// 取消句柄；之后的任何布防与触发都会被拒绝。
    pub fn cancel(&mut self) {
        self.state = WakeState::Cancelled;
    }

    pub const fn is_scheduled(&self) -> bool {
        matches!(self.state, WakeState::Scheduled(_))
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self.state, WakeState::Cancelled)
    }

    /// 已待执行的事件掩码；未布防时为空。
    pub const fn pending(&self) -> IoEvents {
        match self.state {
            WakeState::Scheduled(events) => events,
            _ => IoEvents::empty(),
        }
    }

    /// 成功触发的次数。
    pub const fn fired(&self) -> u64 {
        self.fired
    }
}

impl Default for WakeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeHandle")
            .field("state", &self.state)
            .field("fired", &self.fired)
            .field("bound", &self.is_bound())
            .finish()
    }
}
