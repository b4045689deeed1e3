//! Raw register values and access widths
//!
//! Every register in the tree is read and written as a [`Value`], a 128-bit
//! unsigned integer. That is wide enough for a full CPUID leaf (four 32-bit
//! registers packed together) as well as the 64-bit MSRs. Arithmetic on a
//! value is always modular on the width it was read with.

use std::fmt;

/// Raw register contents
pub type Value = u128;

/// Number of bits in a [`Value`]
pub const VALUE_BITS: u32 = Value::BITS;

/// Mask covering the low `bits` bits of a [`Value`]
///
/// `mask(0)` is zero and anything at or above [`VALUE_BITS`] saturates to
/// all ones.
pub fn mask(bits: u32) -> Value {
    if bits >= VALUE_BITS {
        Value::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Supported access widths for a single binding read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    W128,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
            Width::W128 => 128,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Mask of all bits addressable at this width
    pub fn mask(self) -> Value {
        mask(self.bits())
    }

    /// Truncate `value` to this width
    pub fn truncate(self, value: Value) -> Value {
        value & self.mask()
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Width::W8),
            16 => Some(Width::W16),
            32 => Some(Width::W32),
            64 => Some(Width::W64),
            128 => Some(Width::W128),
            _ => None,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_edges() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(4), 0xF);
        assert_eq!(mask(64), u64::MAX as Value);
        assert_eq!(mask(128), Value::MAX);
        assert_eq!(mask(200), Value::MAX);
    }

    #[test]
    fn test_width_helpers() {
        assert_eq!(Width::W16.mask(), 0xFFFF);
        assert_eq!(Width::W32.bytes(), 4);
        assert_eq!(Width::W8.truncate(0x1234), 0x34);
        assert_eq!(Width::from_bits(64), Some(Width::W64));
        assert_eq!(Width::from_bits(12), None);
        assert_eq!(Width::W128.to_string(), "128-bit");
    }
}
