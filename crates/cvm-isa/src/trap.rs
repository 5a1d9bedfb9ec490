use std::fmt;
use std::str::FromStr;

/// A runtime fault category (spec.md §7). Grounded in
/// `cranelift-codegen`'s `ir::TrapCode`: a small fixed set of reserved
/// codes at one end of the encoding space, with an open range reserved for
/// future use, so the byte-level encoding never has to change shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TrapKind {
    NullDereference = 0,
    UseAfterFree = 1,
    DoubleFree = 2,
    InvalidFree = 3,
    HeapOverflowCanary = 4,
    StackOverflowCanary = 5,
    SignedIntegerOverflow = 6,
    DivisionByZero = 7,
    BoundsViolation = 8,
    UninitializedRead = 9,
    TypeMismatch = 10,
    CfiShadowStackMismatch = 11,
    AlignmentError = 12,
    FfiLookupMiss = 13,
}

impl TrapKind {
    pub const ALL: &'static [TrapKind] = &[
        TrapKind::NullDereference,
        TrapKind::UseAfterFree,
        TrapKind::DoubleFree,
        TrapKind::InvalidFree,
        TrapKind::HeapOverflowCanary,
        TrapKind::StackOverflowCanary,
        TrapKind::SignedIntegerOverflow,
        TrapKind::DivisionByZero,
        TrapKind::BoundsViolation,
        TrapKind::UninitializedRead,
        TrapKind::TypeMismatch,
        TrapKind::CfiShadowStackMismatch,
        TrapKind::AlignmentError,
        TrapKind::FfiLookupMiss,
    ];

    /// The one-line category name printed in the framed diagnostic block
    /// (spec.md §7).
    pub fn category(self) -> &'static str {
        match self {
            TrapKind::NullDereference => "NULL DEREFERENCE",
            TrapKind::UseAfterFree => "USE AFTER FREE",
            TrapKind::DoubleFree => "DOUBLE FREE",
            TrapKind::InvalidFree => "INVALID FREE",
            TrapKind::HeapOverflowCanary => "HEAP OVERFLOW DETECTED",
            TrapKind::StackOverflowCanary => "STACK OVERFLOW DETECTED",
            TrapKind::SignedIntegerOverflow => "SIGNED INTEGER OVERFLOW",
            TrapKind::DivisionByZero => "DIVISION BY ZERO",
            TrapKind::BoundsViolation => "BOUNDS VIOLATION",
            TrapKind::UninitializedRead => "UNINITIALIZED READ",
            TrapKind::TypeMismatch => "TYPE MISMATCH",
            TrapKind::CfiShadowStackMismatch => "CFI SHADOW STACK MISMATCH",
            TrapKind::AlignmentError => "ALIGNMENT ERROR",
            TrapKind::FfiLookupMiss => "FFI TABLE LOOKUP MISS",
        }
    }

    fn ident(self) -> &'static str {
        match self {
            TrapKind::NullDereference => "null_deref",
            TrapKind::UseAfterFree => "use_after_free",
            TrapKind::DoubleFree => "double_free",
            TrapKind::InvalidFree => "invalid_free",
            TrapKind::HeapOverflowCanary => "heap_canary",
            TrapKind::StackOverflowCanary => "stack_canary",
            TrapKind::SignedIntegerOverflow => "int_overflow",
            TrapKind::DivisionByZero => "div_by_zero",
            TrapKind::BoundsViolation => "bounds",
            TrapKind::UninitializedRead => "uninit_read",
            TrapKind::TypeMismatch => "type_mismatch",
            TrapKind::CfiShadowStackMismatch => "cfi_mismatch",
            TrapKind::AlignmentError => "alignment",
            TrapKind::FfiLookupMiss => "ffi_miss",
        }
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ident())
    }
}

impl FromStr for TrapKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().copied().find(|t| t.ident() == s).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        for &trap in TrapKind::ALL {
            assert_eq!(trap.to_string().parse(), Ok(trap));
        }
        assert_eq!("bogus".parse::<TrapKind>(), Err(()));
    }
}
