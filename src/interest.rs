use std::{fmt, ops};

/// A bitmask of readiness interests, corresponding to spec §4.1's
/// `events` bitmask of READ and WRITE.
///
/// Modeled after `mio::Interest`: a non-empty set represented as a small
/// bitmask so it can be copied freely and compared cheaply.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Interest(u8);

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

impl Interest {
    pub const READABLE: Interest = Interest(READABLE);
    pub const WRITABLE: Interest = Interest(WRITABLE);

    /// Combines two interest sets.
    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub(crate) const fn as_u8(self) -> u8 {
        self.0
    }

    pub(crate) const fn from_u8(bits: u8) -> Interest {
        Interest(bits & (READABLE | WRITABLE))
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_readable() {
            parts.push("READABLE");
        }
        if self.is_writable() {
            parts.push("WRITABLE");
        }
        write!(f, "{}", parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_with_bitor() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
    }

    #[test]
    fn bitor_assign_accumulates() {
        let mut interest = Interest::READABLE;
        interest |= Interest::WRITABLE;
        assert!(interest.is_readable());
        assert!(interest.is_writable());
    }

    #[test]
    fn round_trips_through_u8() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert_eq!(Interest::from_u8(both.as_u8()), both);
        assert_eq!(Interest::from_u8(0), Interest::from_u8(0));
        assert!(!Interest::from_u8(0).is_readable());
    }

    #[test]
    fn display_lists_set_bits() {
        assert_eq!(Interest::READABLE.to_string(), "READABLE");
        assert_eq!(Interest::WRITABLE.to_string(), "WRITABLE");
        assert_eq!((Interest::READABLE | Interest::WRITABLE).to_string(), "READABLE|WRITABLE");
        assert_eq!(Interest::from_u8(0).to_string(), "");
    }

    #[test]
    fn from_u8_masks_unknown_bits() {
        let garbage = Interest::from_u8(0b1111_1100);
        assert!(!garbage.is_readable());
        assert!(!garbage.is_writable());
    }
}
