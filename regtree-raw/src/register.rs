//! Register handles and bit-range composition
//!
//! A [`Register`] names one location in a binding: the address and the width
//! it is accessed with. [`RegBits`] selects bits out of one or more registers
//! and presents them as a single right-justified integer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use regtree_raw::{Register, SimBinding, Width};
//!
//! let sim = Arc::new(SimBinding::new("demo").with(0, 0x4321));
//! let reg = Register::new(sim, 0, Width::W16);
//!
//! // bits 11:8 are more significant than bits 3:0
//! let field = reg.bits(11, 8)? + reg.bits(3, 0)?;
//! assert_eq!(field.read()?, 0x31);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::ops::{Add, AddAssign};

use crate::binding::{Result, SharedBinding};
use crate::value::{mask, Value, Width};

/// Bit range does not fit the register it was taken from
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid bit range [{high}:{low}] for {width} register at 0x{address:X}")]
pub struct RangeError {
    pub address: Value,
    pub width: Width,
    pub high: u32,
    pub low: u32,
}

/// A register at a fixed address in a binding
#[derive(Debug, Clone)]
pub struct Register {
    /// Register space the register lives in
    pub binding: SharedBinding,
    /// Address within the binding
    pub address: Value,
    /// Access width
    pub width: Width,
}

impl Register {
    pub fn new(binding: SharedBinding, address: Value, width: Width) -> Self {
        Self {
            binding,
            address,
            width,
        }
    }

    /// Bits `high..=low` of this register
    pub fn bits(&self, high: u32, low: u32) -> std::result::Result<RegBits, RangeError> {
        RegBits::new(self.clone(), high, low)
    }

    /// A single bit
    pub fn bit(&self, bit: u32) -> std::result::Result<RegBits, RangeError> {
        self.bits(bit, bit)
    }

    /// Every bit of the register
    pub fn all(&self) -> RegBits {
        RegBits {
            repr: Repr::Simple {
                reg: self.clone(),
                low: 0,
                count: self.width.bits(),
            },
        }
    }

    pub fn read(&self) -> Result<Value> {
        self.binding.read(self.address, self.width)
    }

    pub fn write(&self, value: Value) -> Result<()> {
        self.binding.write(self.address, self.width, value)
    }
}

#[derive(Clone)]
enum Repr {
    Simple { reg: Register, low: u32, count: u32 },
    // most significant first
    Composite(Vec<RegBits>),
}

/// One logical bitfield drawn from one or more registers
#[derive(Clone)]
pub struct RegBits {
    repr: Repr,
}

impl RegBits {
    /// Select bits `high..=low` of `reg`
    ///
    /// Fails if the range is inverted or does not fit the register width.
    pub fn new(reg: Register, high: u32, low: u32) -> std::result::Result<Self, RangeError> {
        if low > high || high >= reg.width.bits() {
            return Err(RangeError {
                address: reg.address,
                width: reg.width,
                high,
                low,
            });
        }
        Ok(Self {
            repr: Repr::Simple {
                reg,
                low,
                count: high - low + 1,
            },
        })
    }

    /// Concatenate `parts`, the first being the most significant
    pub fn concat(parts: impl IntoIterator<Item = RegBits>) -> Self {
        Self {
            repr: Repr::Composite(parts.into_iter().collect()),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.repr, Repr::Composite(_))
    }

    /// Total number of bits
    pub fn width(&self) -> u32 {
        match &self.repr {
            Repr::Simple { count, .. } => *count,
            Repr::Composite(parts) => parts.iter().map(RegBits::width).sum(),
        }
    }

    pub fn read(&self) -> Result<Value> {
        match &self.repr {
            Repr::Simple { reg, low, count } => {
                let raw = reg.read()?;
                Ok((raw >> low) & mask(*count))
            }
            Repr::Composite(parts) => {
                let mut result: Value = 0;
                for part in parts {
                    let width = part.width();
                    let bits = part.read()?;
                    result = if width >= Value::BITS {
                        bits
                    } else {
                        (result << width) | bits
                    };
                }
                Ok(result)
            }
        }
    }

    pub fn write(&self, value: Value) -> Result<()> {
        match &self.repr {
            Repr::Simple { reg, low, count } => {
                let field_mask = mask(*count);
                if *low == 0 && *count == reg.width.bits() {
                    return reg.write(value & field_mask);
                }
                let current = reg.read()?;
                let updated = (current & !(field_mask << low)) | ((value & field_mask) << low);
                reg.write(updated)
            }
            Repr::Composite(parts) => {
                let mut remaining = value;
                for part in parts.iter().rev() {
                    part.write(remaining)?;
                    let width = part.width();
                    remaining = if width >= Value::BITS {
                        0
                    } else {
                        remaining >> width
                    };
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for RegBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple { reg, low, count } => write!(
                f,
                "{}@0x{:x}[{}:{}]",
                reg.binding.describe(),
                reg.address,
                low + count - 1,
                low
            ),
            Repr::Composite(parts) => f.debug_list().entries(parts).finish(),
        }
    }
}

impl Add for RegBits {
    type Output = RegBits;

    /// `a + b` places `a` above `b`
    fn add(mut self, rhs: RegBits) -> RegBits {
        self += rhs;
        self
    }
}

impl AddAssign for RegBits {
    fn add_assign(&mut self, rhs: RegBits) {
        match &mut self.repr {
            Repr::Composite(parts) => parts.push(rhs),
            Repr::Simple { .. } => {
                let lhs = std::mem::replace(&mut self.repr, Repr::Composite(Vec::new()));
                self.repr = Repr::Composite(vec![RegBits { repr: lhs }, rhs]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBinding;
    use std::sync::Arc;

    fn reg16(initial: Value) -> (Arc<SimBinding>, Register) {
        let sim = Arc::new(SimBinding::new("test").with(0, initial));
        let reg = Register::new(sim.clone(), 0, Width::W16);
        (sim, reg)
    }

    #[test]
    fn test_simple_read_write_preserves_other_bits() {
        let (sim, reg) = reg16(0xFFFF);
        let bits = reg.bits(7, 4).unwrap();
        assert_eq!(bits.width(), 4);
        assert_eq!(bits.read().unwrap(), 0xF);

        bits.write(0x5).unwrap();
        assert_eq!(bits.read().unwrap(), 0x5);
        assert_eq!(sim.get(0), 0xFF5F);

        // excess bits are masked away
        bits.write(0x1A).unwrap();
        assert_eq!(bits.read().unwrap(), 0xA);
        assert_eq!(sim.get(0), 0xFFAF);
    }

    #[test]
    fn test_every_range_of_a_byte() {
        let sim = Arc::new(SimBinding::new("byte"));
        let reg = Register::new(sim.clone(), 0, Width::W8);
        for high in 0..8 {
            for low in 0..=high {
                sim.set(0, 0xA5);
                let bits = reg.bits(high, low).unwrap();
                let outside = !(mask(high - low + 1) << low) & 0xFF;
                bits.write(0x3C).unwrap();
                assert_eq!(bits.read().unwrap(), 0x3C & mask(high - low + 1));
                assert_eq!(sim.get(0) & outside, 0xA5 & outside);
            }
        }
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        let (_, reg) = reg16(0);
        let err = reg.bits(16, 0).unwrap_err();
        assert_eq!(err.high, 16);
        assert!(reg.bits(3, 4).is_err());
        assert!(reg.bits(15, 15).is_ok());
    }

    #[test]
    fn test_composite_read_and_write() {
        let (sim, reg) = reg16(0x4321);
        let field = reg.bits(11, 8).unwrap() + reg.bits(3, 0).unwrap();
        assert!(field.is_composite());
        assert_eq!(field.width(), 8);
        assert_eq!(field.read().unwrap(), 0x31);

        field.write(0x98).unwrap();
        assert_eq!(field.read().unwrap(), 0x98);
        assert_eq!(sim.get(0), 0x4928);
    }

    #[test]
    fn test_composite_matches_concatenation() {
        let a_sim = Arc::new(SimBinding::new("a").with(0x10, 0xABCD));
        let b_sim = Arc::new(SimBinding::new("b").with(0x20, 0x77));
        let a = Register::new(a_sim, 0x10, Width::W16).bits(15, 4).unwrap();
        let b = Register::new(b_sim, 0x20, Width::W8).bits(6, 0).unwrap();

        let mut c = a.clone();
        c += b.clone();
        let expected = (a.read().unwrap() << b.width()) | b.read().unwrap();
        assert_eq!(c.read().unwrap(), expected);

        c.write(0xFFFF_FFFF).unwrap();
        assert_eq!(c.read().unwrap(), mask(c.width()));
    }

    #[test]
    fn test_full_width_write_skips_read() {
        let (sim, reg) = reg16(0x1234);
        reg.all().write(0xBEEF).unwrap();
        assert_eq!(sim.get(0), 0xBEEF);
        assert_eq!(sim.writes(), vec![(0, Width::W16, 0xBEEF)]);
    }
}
