//! 流接口的流控与生命周期标志。
//!
//! ## 设计目标（Why）
//! - 接收方向的阻塞原因拆成五个独立比特，分别归属不同子系统，各自清理自己的条件而无需协调；
//! - “是否有任何阻塞”只需一次位与运算即可判定。
//!
//! ## 契约说明（What）
//! - 每个比特恰好归属一个 [`FlagOwner`]，对外的置位/清除入口在调试构建中断言归属；
//! - `RXBLK_ANY` 是五个接收阻塞位的并集，仅用于聚合判断，不会出现在 `Debug` 输出中。
//!
//! ## 风险提示（Trade-offs）
//! - `RXBLK_BUFF`、`RXBLK_ROOM` 置位时会同步清除端点拥有的 `RX_WAIT_EP`，
//!   这是协议内唯一一处跨归属写入：阻塞解除后端点必须被重新调用。

use crate::macros::bit_set;

bit_set! {
    /// 流接口标志位集合。
    pub struct InterfaceFlags: u32 {
        /// 下游通道暂不接受更多数据（流转发逻辑）。
        const RXBLK_CHAN = 1 << 0;
        /// 没有可用的接收缓冲区（缓冲分配器）。
        const RXBLK_BUFF = 1 << 1;
        /// 输入缓冲区没有空间（通道层）。
        const RXBLK_ROOM = 1 << 2;
        /// 接收方向已永久关闭。
        const RXBLK_SHUT = 1 << 3;
        /// 对端接口尚未连接（流逻辑）。
        const RXBLK_CONN = 1 << 4;
        /// 端点暂无更多数据可推送。
        const RX_WAIT_EP = 1 << 5;
        /// 端点希望从输出通道拉取数据。
        const WANT_GET = 1 << 6;
        /// 端点在等待输出数据。
        const WAIT_DATA = 1 << 7;
        /// 下一次关闭写方向时直接销毁整个连接。
        const KILL_CONN = 1 << 8;
        /// 关闭时不做 linger。
        const NOLINGER = 1 << 9;
        /// 读方向关闭后立即转发到写方向，不保留半关闭。
        const NOHALF = 1 << 10;
        /// 不唤醒流任务。
        const DONT_WAKE = 1 << 11;
        /// 建连时需要记录源地址用于日志。
        const SRC_ADDR = 1 << 12;
        /// 连接层报告了错误。
        const ERR = 1 << 13;
        /// 超时检查发现 `exp` 已过期。
        const EXP = 1 << 14;

        const RXBLK_ANY = 0x1f;
    }
}

/// 标志位的归属子系统。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlagOwner {
    /// 连接层或 applet：端点自己的就绪与错误信号。
    Endpoint,
    /// 通道层：缓冲区空间。
    Channel,
    /// 缓冲分配器。
    Buffer,
    /// 流逻辑：转发、生命周期策略与超时检查。
    Stream,
}

impl FlagOwner {
    pub const ALL: [FlagOwner; 4] = [
        FlagOwner::Endpoint,
        FlagOwner::Channel,
        FlagOwner::Buffer,
        FlagOwner::Stream,
    ];

    /// 返回该子系统拥有的全部比特。
    pub const fn bits(self) -> InterfaceFlags {
        match self {
            FlagOwner::Endpoint => InterfaceFlags::RX_WAIT_EP
                .union(InterfaceFlags::WANT_GET)
                .union(InterfaceFlags::WAIT_DATA)
                .union(InterfaceFlags::ERR),
            FlagOwner::Channel => InterfaceFlags::RXBLK_ROOM,
            FlagOwner::Buffer => InterfaceFlags::RXBLK_BUFF,
            FlagOwner::Stream => InterfaceFlags::RXBLK_CHAN
                .union(InterfaceFlags::RXBLK_CONN)
                .union(InterfaceFlags::RXBLK_SHUT)
                .union(InterfaceFlags::KILL_CONN)
                .union(InterfaceFlags::NOLINGER)
                .union(InterfaceFlags::NOHALF)
                .union(InterfaceFlags::DONT_WAKE)
                .union(InterfaceFlags::SRC_ADDR)
                .union(InterfaceFlags::EXP),
        }
    }

    /// 判断 `flags` 中的比特是否全部归属当前子系统。
    pub const fn owns(self, flags: InterfaceFlags) -> bool {
        self.bits().contains(flags)
    }
}

impl InterfaceFlags {
    /// 查询单个比特的归属者；组合掩码或未知比特返回 `None`。
    pub fn owner_of(flag: InterfaceFlags) -> Option<FlagOwner> {
        if flag.bits().count_ones() != 1 {
            return None;
        }
        FlagOwner::ALL.into_iter().find(|owner| owner.owns(flag))
    }
}
