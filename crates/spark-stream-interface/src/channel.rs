//! 通道层协作接口。
//!
//! ## 角色定位（Why）
//! - 通道是“单向缓冲区 + 流控状态”，存储与分配器都在本 crate 之外；
//! - 流接口只需要读写通道的控制面：关闭标志、读写到期时间，以及少量缓冲操作
//!   （判空、判断可否接收、申请缓冲、清空、截断、注入回包）。
//!
//! ## 契约说明（What）
//! - [`ChannelControl`] 是通道控制面的值类型，实现者原样暴露即可；
//! - [`Channel::alloc_buffer`] 可能失败，失败时通道层负责登记 [`BufferWaiter`]，
//!   缓冲区可用后由通道层唤醒对应接口重试。

use std::time::{Duration, Instant};

use crate::macros::bit_set;
use crate::state::Side;
use crate::time::Expiry;

bit_set! {
    /// 通道控制标志。
    pub struct ChannelFlags: u32 {
        /// 读方向已关闭。
        const SHUTR = 1 << 0;
        /// 写方向已关闭。
        const SHUTW = 1 << 1;
        /// 请求尽快关闭读方向。
        const SHUTR_NOW = 1 << 2;
        /// 请求尽快关闭写方向。
        const SHUTW_NOW = 1 << 3;
        /// 读方向不设置到期时间。
        const READ_NOEXP = 1 << 4;
        /// 暂停读取。
        const DONT_READ = 1 << 5;
        /// 输出耗尽后自动关闭写方向。
        const AUTO_CLOSE = 1 << 6;
        /// 允许自动发起建连。
        const AUTO_CONNECT = 1 << 7;
        const READ_ERROR = 1 << 8;
        const WRITE_ERROR = 1 << 9;
        /// 本轮读到了部分数据。
        const READ_PARTIAL = 1 << 10;
        /// 本轮读到了连接关闭。
        const READ_NULL = 1 << 11;
        /// 本轮写出了部分数据。
        const WRITE_PARTIAL = 1 << 12;
        /// 本轮建连完成（写方向首次可用）。
        const WRITE_NULL = 1 << 13;
        /// 输出耗尽或连接不再建立时通知流任务。
        const WAKE_WRITE = 1 << 14;
    }
}

impl ChannelFlags {
    /// 每轮调度开始前被清除的活动标志。
    pub const ACTIVITY: ChannelFlags = ChannelFlags::READ_PARTIAL
        .union(ChannelFlags::READ_NULL)
        .union(ChannelFlags::WRITE_PARTIAL)
        .union(ChannelFlags::WRITE_NULL);
}

/// 通道控制面：标志、读写到期时间与超时设置。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelControl {
    pub flags: ChannelFlags,
    /// 读方向到期时间。
    pub rex: Expiry,
    /// 写方向到期时间。
    pub wex: Expiry,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl ChannelControl {
    /// 恢复自动读取。
    pub fn auto_read(&mut self) {
        self.flags.remove(ChannelFlags::DONT_READ);
    }

    pub fn auto_close(&mut self) {
        self.flags.insert(ChannelFlags::AUTO_CLOSE);
    }

    pub fn shutr_now(&mut self) {
        self.flags.insert(ChannelFlags::SHUTR_NOW);
    }

    /// 请求尽快关闭两个方向，并禁止自动建连。
    pub fn abort(&mut self) {
        self.flags
            .insert(ChannelFlags::SHUTR_NOW | ChannelFlags::SHUTW_NOW);
        self.flags.remove(ChannelFlags::AUTO_CONNECT);
    }

    /// 若写方向尚未设置到期时间，则按写超时设置。
    pub fn arm_write_expiry(&mut self, now: Instant) {
        if !self.wex.is_set() {
            self.wex = Expiry::add_ifset(now, self.write_timeout);
        }
    }
}

/// 等待缓冲区的登记者。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferWaiter {
    pub side: Side,
}

/// 单向通道。
pub trait Channel {
    fn control(&self) -> &ChannelControl;

    fn control_mut(&mut self) -> &mut ChannelControl;

    /// 是否没有待发送的输出数据。
    fn is_empty(&self) -> bool;

    /// 输入缓冲区是否还能接收数据。
    fn may_receive(&self) -> bool;

    /// 申请缓冲区；失败时登记 `waiter` 并返回 `false`。
    fn alloc_buffer(&mut self, waiter: BufferWaiter) -> bool;

    /// 待发送的输出数据视图。
    fn output(&self) -> &[u8];

    /// 丢弃已被端点发送的前 `n` 个字节。
    fn consume(&mut self, n: usize);

    /// 清空全部内容。
    fn erase(&mut self);

    /// 丢弃尚未转发的输入数据，保留已经调度发送的输出。
    fn truncate(&mut self);

    /// 向输出注入一段数据，返回实际写入的字节数。
    fn inject(&mut self, data: &[u8]) -> usize;
}
