use std::fmt;

/// One of the 32 general-purpose integer registers. `x0` is a zero sink:
/// reads always observe `0` and writes are discarded, the same convention
/// RISC-V and pulley's `XReg` use.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct XReg(u8);

/// One of the 32 floating-point registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FReg(u8);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnyReg {
    X(XReg),
    F(FReg),
}

macro_rules! reg_type {
    ($name:ident, $bank:literal) => {
        impl $name {
            pub const ZERO: Self = Self(0);
            /// The first eight registers of each bank are the argument
            /// registers by convention (spec.md §4.1).
            pub const ARG_COUNT: u8 = 8;

            pub const fn new(index: u8) -> Option<Self> {
                if index < 32 {
                    Some(Self(index))
                } else {
                    None
                }
            }

            pub const fn index(self) -> u8 {
                self.0
            }

            pub const fn is_arg(self) -> bool {
                self.0 < Self::ARG_COUNT
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $bank, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

reg_type!(XReg, "x");
reg_type!(FReg, "f");

impl From<XReg> for AnyReg {
    fn from(r: XReg) -> Self {
        AnyReg::X(r)
    }
}

impl From<FReg> for AnyReg {
    fn from(r: FReg) -> Self {
        AnyReg::F(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_indices_are_bounded() {
        assert!(XReg::new(31).is_some());
        assert!(XReg::new(32).is_none());
    }

    #[test]
    fn x0_is_the_zero_sink_by_convention() {
        assert_eq!(XReg::ZERO.index(), 0);
    }

    #[test]
    fn first_eight_registers_are_argument_registers() {
        assert!(XReg::new(7).unwrap().is_arg());
        assert!(!XReg::new(8).unwrap().is_arg());
    }
}
