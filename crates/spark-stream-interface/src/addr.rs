//! 源/目的地址的惰性解析与缓存。
//!
//! ## 设计目标（Why）
//! - 地址只在首次被请求时解析，之后复用缓存；日志路径可能多次读取，解析却只发生一次；
//! - 以 [`AddrSlot`] 和类型区分“已解析 / 未解析”，缓存写入与“已设置”标记是同一次赋值，
//!   不存在标记先于数据可见的顺序问题。
//!
//! ## 回退链（How）
//! - 前端接口：回退到流所属会话的地址；
//! - 后端接口：回退到当前绑定连接的地址；未绑定连接时解析失败。
//!
//! 解析失败时槽位保持未解析，底层连接或会话之后可能提供更多信息，允许下次重试。

use std::net::SocketAddr;

use crate::endpoint::{Endpoint, Session};
use crate::state::Side;
use crate::stream::Stream;

/// 一次写入的地址缓存。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddrSlot {
    #[default]
    Unresolved,
    Resolved(SocketAddr),
}

impl AddrSlot {
    pub const fn get(&self) -> Option<SocketAddr> {
        match self {
            AddrSlot::Unresolved => None,
            AddrSlot::Resolved(addr) => Some(*addr),
        }
    }

    pub const fn is_resolved(&self) -> bool {
        matches!(self, AddrSlot::Resolved(_))
    }

    /// 未解析时调用 `resolve`，成功则写入缓存；已解析时直接返回 `true`。
    fn resolve_with(&mut self, resolve: impl FnOnce() -> Option<SocketAddr>) -> bool {
        if self.is_resolved() {
            return true;
        }
        match resolve() {
            Some(addr) => {
                *self = AddrSlot::Resolved(addr);
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Source,
    Destination,
}

fn lookup(side: Side, session: &dyn Session, endpoint: &Endpoint, dir: Direction) -> Option<SocketAddr> {
    match (side, dir) {
        (Side::Front, Direction::Source) => session.src(),
        (Side::Front, Direction::Destination) => session.dst(),
        (Side::Back, Direction::Source) => endpoint.connection().and_then(|conn| conn.src()),
        (Side::Back, Direction::Destination) => endpoint.connection().and_then(|conn| conn.dst()),
    }
}

impl Stream {
    /// 解析并缓存 `side` 接口的源地址，成功返回 `true`。
    pub fn get_source(&mut self, side: Side) -> bool {
        let (si, session) = self.interface_and_session(side);
        let endpoint = &si.endpoint;
        si.src
            .resolve_with(|| lookup(side, session, endpoint, Direction::Source))
    }

    /// 解析并缓存 `side` 接口的目的地址，成功返回 `true`。
    pub fn get_destination(&mut self, side: Side) -> bool {
        let (si, session) = self.interface_and_session(side);
        let endpoint = &si.endpoint;
        si.dst
            .resolve_with(|| lookup(side, session, endpoint, Direction::Destination))
    }

    /// 读取源地址：优先缓存，否则沿回退链查询，但不写入缓存。
    pub fn source(&self, side: Side) -> Option<SocketAddr> {
        let si = self.interface(side);
        si.src
            .get()
            .or_else(|| lookup(side, self.session(), &si.endpoint, Direction::Source))
    }

    /// 读取目的地址，语义同 [`Stream::source`]。
    pub fn destination(&self, side: Side) -> Option<SocketAddr> {
        let si = self.interface(side);
        si.dst
            .get()
            .or_else(|| lookup(side, self.session(), &si.endpoint, Direction::Destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_write_once() {
        let first: SocketAddr = "10.0.0.1:80".parse().expect("地址");
        let second: SocketAddr = "10.0.0.2:80".parse().expect("地址");
        let mut slot = AddrSlot::Unresolved;

        assert!(!slot.resolve_with(|| None));
        assert_eq!(slot, AddrSlot::Unresolved);

        assert!(slot.resolve_with(|| Some(first)));
        assert!(slot.resolve_with(|| Some(second)));
        assert_eq!(slot.get(), Some(first));
    }
}
