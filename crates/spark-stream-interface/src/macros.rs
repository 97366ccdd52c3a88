//! crate 内部宏工具集。
//!
//! - 只提供位集合类型的语法辅助，不隐藏任何全局状态；
//! - 当前提供 `bit_set!`，统一生成流接口标志、通道标志、错误类别等位图新类型。

/// 声明一个以整数为底层存储的位集合新类型。
///
/// # 设计动机（Why）
/// - 流接口层存在大量“按位组合”的状态：接口标志、通道标志、错误类别、建连标志等；
///   若逐一手写 `contains`/`insert`/`remove`，不仅样板冗长，而且容易出现语义漂移。
/// - 与 `TraceFlags`、`CapabilityBitmap` 一样坚持“新类型 + 常量”的写法，避免裸整数在 API 中流通。
///
/// # 展开逻辑（How）
/// - 为每个 `const` 生成同名关联常量；
/// - 生成 `const fn` 形式的集合运算，保证掩码可在编译期组合；
/// - `Debug` 只打印单比特常量的名称，组合掩码（如 `RXBLK_ANY`）不会重复出现。
///
/// # 契约说明（What）
/// - **前置条件**：底层类型必须是无符号整数；
/// - **后置条件**：生成的类型实现 `Copy + Eq + Hash + Default`，默认值为空集合。
macro_rules! bit_set {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $repr:ty {
            $(
                $(#[$cmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name {
            bits: $repr,
        }

        #[allow(dead_code)]
        impl $name {
            $(
                $(#[$cmeta])*
                pub const $flag: Self = Self { bits: $value };
            )*

            /// 空集合。
            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// 由原始位值构造集合。
            pub const fn from_bits(bits: $repr) -> Self {
                Self { bits }
            }

            /// 返回底层位值，便于写入日志或断言。
            pub const fn bits(self) -> $repr {
                self.bits
            }

            pub const fn is_empty(self) -> bool {
                self.bits == 0
            }

            /// `other` 中的所有位是否都已置位。
            pub const fn contains(self, other: Self) -> bool {
                self.bits & other.bits == other.bits
            }

            /// 是否与 `other` 存在任意交集。
            pub const fn intersects(self, other: Self) -> bool {
                self.bits & other.bits != 0
            }

            pub const fn union(self, other: Self) -> Self {
                Self {
                    bits: self.bits | other.bits,
                }
            }

            pub const fn intersection(self, other: Self) -> Self {
                Self {
                    bits: self.bits & other.bits,
                }
            }

            pub const fn difference(self, other: Self) -> Self {
                Self {
                    bits: self.bits & !other.bits,
                }
            }

            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// 按布尔值置位或清除。
            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            const NAMED: &'static [(&'static str, $name)] = &[
                $((stringify!($flag), $name { bits: $value }),)*
            ];
        }

        impl ::core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl ::core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.insert(rhs);
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(stringify!($name))?;
                f.write_str("(")?;
                let mut first = true;
                for (label, flag) in Self::NAMED {
                    if flag.bits.count_ones() == 1 && self.contains(*flag) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(label)?;
                        first = false;
                    }
                }
                f.write_str(")")
            }
        }
    };
}

pub(crate) use bit_set;
