//! # Packet Flags
//!
//! The first byte of every frame. Bit positions are fixed; peers built from
//! other code bases read the same layout.

use std::fmt;
use std::ops::BitOr;
use std::ops::BitOrAssign;

/// Bit set carried in the leading byte of a frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const EMPTY: Flags = Flags(0);
    /// Frame is a method call.
    pub const METHOD_CALL: Flags = Flags(1 << 0);
    /// Target is a two byte id instead of two names.
    pub const OPTIMIZED: Flags = Flags(1 << 1);
    /// Call carries no call id and expects no response.
    pub const NO_CALL_ID: Flags = Flags(1 << 2);
    /// Frame is a method response.
    pub const METHOD_RESPONSE: Flags = Flags(1 << 3);
    pub const NO_RESULT: Flags = Flags(1 << 4);
    pub const NO_EXCEPTION: Flags = Flags(1 << 5);
    pub const INVALID_CALL: Flags = Flags(1 << 6);
    pub const CALL_FAILED: Flags = Flags(1 << 7);

    /// Mask of the three mutually exclusive outcome bits of a response.
    const OUTCOME: Flags = Flags(Self::NO_EXCEPTION.0 | Self::INVALID_CALL.0 | Self::CALL_FAILED.0);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Returns the outcome bits alone, used to check that exactly one is set.
    pub const fn outcome(self) -> Flags {
        Flags(self.0 & Self::OUTCOME.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] = [
            "METHOD_CALL",
            "OPTIMIZED",
            "NO_CALL_ID",
            "METHOD_RESPONSE",
            "NO_RESULT",
            "NO_EXCEPTION",
            "INVALID_CALL",
            "CALL_FAILED",
        ];

        let set: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();

        write!(f, "Flags({:#04x}: {})", self.0, set.join(" | "))
    }
}
