//! Readiness / interest bitmask, analogous to `mio::Interest` but including
//! the close/error bits `epoll` reports back that a pure "interest" type
//! doesn't need.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Ready(u8);

impl Ready {
    pub const NONE: Ready = Ready(0);
    pub const READABLE: Ready = Ready(0b0001);
    pub const WRITABLE: Ready = Ready(0b0010);
    pub const PRIORITY: Ready = Ready(0b0100);
    pub const HUP: Ready = Ready(0b1000);
    pub const ERROR: Ready = Ready(0b1_0000);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_priority(self) -> bool {
        self.0 & Self::PRIORITY.0 != 0
    }

    pub fn is_hup(self) -> bool {
        self.0 & Self::HUP.0 != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Ready) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }
}

impl BitOr for Ready {
    type Output = Ready;
    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_readable() {
            parts.push("READABLE");
        }
        if self.is_writable() {
            parts.push("WRITABLE");
        }
        if self.is_priority() {
            parts.push("PRIORITY");
        }
        if self.is_hup() {
            parts.push("HUP");
        }
        if self.is_error() {
            parts.push("ERROR");
        }
        if parts.is_empty() {
            parts.push("NONE");
        }
        write!(f, "{}", parts.join(" | "))
    }
}
