//! 流接口状态机与状态掩码。
//!
//! ## 设计目标（Why）
//! - 后端流接口按因果顺序经历 `INI → REQ → QUE → TAR → ASS → CON → CER → RDY → EST → DIS → CLO`
//!   十一个状态；前端流接口通常直接创建在 `EST`。
//! - 调度与流控逻辑大量使用“是否处于某一组状态”的判断，例如“已就绪或已建立”。
//!   这些集合统一声明为 [`StateMask`] 常量，并由枚举判别值推导，新增状态时不会出现
//!   某个掩码遗漏的静默漂移。
//!
//! ## 契约说明（What）
//! - [`InterfaceState`] 只有十一个取值，任何其他值都无法构造；
//! - [`InterfaceState::bit`] 为每个状态分配唯一比特；
//! - `SB_*` 常量描述调用方使用的策略集合，`SB_ALL` 覆盖全部状态。
//!
//! ## 风险提示（Trade-offs）
//! - `CLO` 是吸收态：外层包装在 `CLO` 下直接返回，不再咨询标志、也不再分派操作。

use core::fmt;

use crate::macros::bit_set;

/// 流接口的生命周期状态。
///
/// 判别值按因果顺序递增；状态集合判断一律通过 [`StateMask`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum InterfaceState {
    /// 初始态，尚未绑定端点。
    Ini = 0,
    /// 已请求建连。
    Req,
    /// 已排队，暂无可用服务器槽位。
    Que,
    /// 重试前的刻意延迟（tarpit）。
    Tar,
    /// 已分配服务器。
    Ass,
    /// 建连尝试进行中。
    Con,
    /// 建连失败，可能重试。
    Cer,
    /// 传输层就绪，尚未被流逻辑确认可用。
    Rdy,
    /// 全双工已建立。
    Est,
    /// 一个或两个方向已关闭。
    Dis,
    /// 完全关闭，终态。
    Clo,
}

impl InterfaceState {
    /// 按因果顺序列出的全部状态。
    pub const ALL: [InterfaceState; 11] = [
        InterfaceState::Ini,
        InterfaceState::Req,
        InterfaceState::Que,
        InterfaceState::Tar,
        InterfaceState::Ass,
        InterfaceState::Con,
        InterfaceState::Cer,
        InterfaceState::Rdy,
        InterfaceState::Est,
        InterfaceState::Dis,
        InterfaceState::Clo,
    ];

    /// 返回状态对应的掩码比特。
    pub const fn bit(self) -> StateMask {
        StateMask::from_bits(1 << (self as u16))
    }

    /// 判断状态是否属于 `mask` 描述的集合。
    pub const fn is_in(self, mask: StateMask) -> bool {
        mask.intersects(self.bit())
    }

    /// 是否为终态 `CLO`。
    pub const fn is_closed(self) -> bool {
        matches!(self, InterfaceState::Clo)
    }

    /// 诊断用的三字母状态名。
    pub const fn name(self) -> &'static str {
        match self {
            InterfaceState::Ini => "INI",
            InterfaceState::Req => "REQ",
            InterfaceState::Que => "QUE",
            InterfaceState::Tar => "TAR",
            InterfaceState::Ass => "ASS",
            InterfaceState::Con => "CON",
            InterfaceState::Cer => "CER",
            InterfaceState::Rdy => "RDY",
            InterfaceState::Est => "EST",
            InterfaceState::Dis => "DIS",
            InterfaceState::Clo => "CLO",
        }
    }
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 流接口位于流的哪一侧。
///
/// 前端接口面向客户端，输入通道为请求通道；后端接口面向服务器，输入通道为响应通道。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub const fn opposite(self) -> Side {
        match self {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }

    pub const fn is_back(self) -> bool {
        matches!(self, Side::Back)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bit_set! {
    /// 状态集合，每个比特对应一个 [`InterfaceState`]。
    pub struct StateMask: u16 {
        const INI = 1 << InterfaceState::Ini as u16;
        const REQ = 1 << InterfaceState::Req as u16;
        const QUE = 1 << InterfaceState::Que as u16;
        const TAR = 1 << InterfaceState::Tar as u16;
        const ASS = 1 << InterfaceState::Ass as u16;
        const CON = 1 << InterfaceState::Con as u16;
        const CER = 1 << InterfaceState::Cer as u16;
        const RDY = 1 << InterfaceState::Rdy as u16;
        const EST = 1 << InterfaceState::Est as u16;
        const DIS = 1 << InterfaceState::Dis as u16;
        const CLO = 1 << InterfaceState::Clo as u16;
    }
}

impl StateMask {
    /// 判断 `state` 是否在集合中。
    pub const fn has(self, state: InterfaceState) -> bool {
        state.is_in(self)
    }
}

const fn all_states() -> StateMask {
    let mut mask = StateMask::empty();
    let mut idx = 0;
    while idx < InterfaceState::ALL.len() {
        mask = mask.union(InterfaceState::ALL[idx].bit());
        idx += 1;
    }
    mask
}

/// 全部状态。
pub const SB_ALL: StateMask = all_states();

/// 流控意义上的“已连接”：`RDY | EST`，也是接收分派的前提。
pub const SB_CONNECTED: StateMask = StateMask::RDY.union(StateMask::EST);

/// 对端就绪后即可解除 `RXBLK_CONN` 的状态：`RDY | EST | DIS | CLO`。
pub const SB_READY_OR_LATER: StateMask = SB_CONNECTED.union(SB_DISCONNECTED);

/// 连接层操作有意义的状态：`CON | RDY | EST`。
pub const SB_CONNECTING: StateMask = StateMask::CON.union(SB_CONNECTED);

/// 尚未拿到可用连接、关闭写方向时需直接进入 `DIS` 的状态：`CON | CER | QUE | TAR`。
pub const SB_PRE_CONNECT: StateMask = StateMask::CON
    .union(StateMask::CER)
    .union(StateMask::QUE)
    .union(StateMask::TAR);

/// 已断开：`DIS | CLO`。
pub const SB_DISCONNECTED: StateMask = StateMask::DIS.union(StateMask::CLO);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_has_a_distinct_bit() {
        let mut seen = StateMask::empty();
        for state in InterfaceState::ALL {
            assert!(!seen.intersects(state.bit()), "{state} 的比特重复");
            seen.insert(state.bit());
        }
        assert_eq!(seen, SB_ALL);
        assert_eq!(SB_ALL.bits().count_ones(), 11);
    }

    #[test]
    fn named_masks_match_policy() {
        assert!(InterfaceState::Rdy.is_in(SB_CONNECTED));
        assert!(InterfaceState::Est.is_in(SB_CONNECTED));
        assert!(!InterfaceState::Con.is_in(SB_CONNECTED));
        assert!(!InterfaceState::Dis.is_in(SB_CONNECTED));

        for state in [
            InterfaceState::Rdy,
            InterfaceState::Est,
            InterfaceState::Dis,
            InterfaceState::Clo,
        ] {
            assert!(SB_READY_OR_LATER.has(state));
        }
        assert!(!SB_READY_OR_LATER.has(InterfaceState::Cer));
        assert!(SB_CONNECTING.has(InterfaceState::Con));
        assert!(SB_PRE_CONNECT.has(InterfaceState::Tar));
        assert!(!SB_PRE_CONNECT.has(InterfaceState::Ass));
    }

    #[test]
    fn states_are_ordered_causally() {
        let names: Vec<_> = InterfaceState::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["INI", "REQ", "QUE", "TAR", "ASS", "CON", "CER", "RDY", "EST", "DIS", "CLO"]
        );
        assert!(InterfaceState::Con < InterfaceState::Est);
        assert_eq!(format!("{:?}", SB_CONNECTED), "StateMask(RDY | EST)");
    }
}
