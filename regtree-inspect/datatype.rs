//! Conversions between raw register values and display strings
//!
//! Every field carries a [`Datatype`]. `evaluate` renders a raw value for a
//! human, `lookup` goes the other way and turns a token typed by a human back
//! into the raw value to write.

use std::fmt;

use regtree_raw::{KeyedVec, Value, VALUE_BITS};

use crate::error::{RegtreeError, Result};

/// Sentinel rendered for a value or bit with no declared name
pub fn unknown_token(n: impl fmt::Display) -> String {
    format!("<!{n}!>")
}

/// Ordered name to value table shared by enum and bool datatypes
#[derive(Debug, Clone, Default)]
pub struct EnumType {
    values: KeyedVec<String, Value>,
    unknown: Option<String>,
}

impl EnumType {
    /// Build from `(name, value)` pairs in declaration order
    ///
    /// A repeated name keeps its first declaration; later ones are logged
    /// and dropped.
    pub fn new<S: Into<String>>(pairs: impl IntoIterator<Item = (S, Value)>) -> Self {
        let mut values = KeyedVec::new();
        for (name, value) in pairs {
            let name = name.into();
            if values.contains_key(&name) {
                tracing::warn!("Duplicate enum key '{}' ignored", name);
                continue;
            }
            values.insert(name, value);
        }
        Self {
            values,
            unknown: None,
        }
    }

    /// Render undeclared values as `unknown` instead of the sentinel token
    pub fn with_unknown(mut self, unknown: impl Into<String>) -> Self {
        self.unknown = Some(unknown.into());
        self
    }

    pub fn values(&self) -> &KeyedVec<String, Value> {
        &self.values
    }

    fn evaluate(&self, value: Value) -> String {
        self.values
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(name, _)| name.clone())
            .or_else(|| self.unknown.clone())
            .unwrap_or_else(|| unknown_token(value))
    }

    fn lookup(&self, kind: &str, token: &str) -> Result<Value> {
        self.values
            .get(token)
            .copied()
            .ok_or_else(|| RegtreeError::datatype_invalid(kind, token))
    }

    fn lookup_value(&self, kind: &str, value: Value) -> Result<Value> {
        if self.values.values().any(|v| *v == value) {
            Ok(value)
        } else {
            Err(RegtreeError::datatype_invalid(kind, value))
        }
    }
}

/// Ordered name to bit position table
#[derive(Debug, Clone, Default)]
pub struct BitmaskType {
    bits: KeyedVec<String, u32>,
}

impl BitmaskType {
    pub fn new<S: Into<String>>(pairs: impl IntoIterator<Item = (S, u32)>) -> Result<Self> {
        let mut bits = KeyedVec::new();
        for (name, bit) in pairs {
            let name = name.into();
            if bit >= VALUE_BITS {
                return Err(RegtreeError::datatype_invalid("bitmask", bit));
            }
            if bits.contains_key(&name) {
                tracing::warn!("Duplicate bitmask key '{}' ignored", name);
                continue;
            }
            bits.insert(name, bit);
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> &KeyedVec<String, u32> {
        &self.bits
    }

    fn declared_mask(&self) -> Value {
        self.bits.values().fold(0, |acc, bit| acc | (1 << bit))
    }

    fn evaluate(&self, value: Value) -> String {
        let mut remaining = value;
        let mut tokens = Vec::new();
        for (name, bit) in self.bits.iter() {
            let flag: Value = 1 << bit;
            if value & flag != 0 {
                tokens.push(name.clone());
                remaining &= !flag;
            }
        }
        while remaining != 0 {
            let bit = remaining.trailing_zeros();
            tokens.push(unknown_token(bit));
            remaining &= remaining - 1;
        }
        tokens.join(" ")
    }
}

/// Plain integer with an optional unit suffix
#[derive(Debug, Clone, Default)]
pub struct IntType {
    units: Option<String>,
}

/// Hexadecimal integer zero-padded to a bit width
#[derive(Debug, Clone, Default)]
pub struct HexType {
    width: u32,
    units: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Datatype {
    Enum(EnumType),
    Bitmask(BitmaskType),
    Bool(EnumType),
    Int(IntType),
    Hex(HexType),
}

impl Datatype {
    pub fn enumeration<S: Into<String>>(pairs: impl IntoIterator<Item = (S, Value)>) -> Self {
        Datatype::Enum(EnumType::new(pairs))
    }

    pub fn bitmask<S: Into<String>>(pairs: impl IntoIterator<Item = (S, u32)>) -> Result<Self> {
        Ok(Datatype::Bitmask(BitmaskType::new(pairs)?))
    }

    pub fn boolean(true_name: &str, false_name: &str) -> Self {
        Datatype::Bool(EnumType::new([(true_name, 1), (false_name, 0)]))
    }

    pub fn int() -> Self {
        Datatype::Int(IntType::default())
    }

    pub fn int_with_units(units: impl Into<String>) -> Self {
        Datatype::Int(IntType {
            units: Some(units.into()),
        })
    }

    /// Hex rendering padded to `width` bits (0 for no padding)
    pub fn hex(width: u32) -> Self {
        Datatype::Hex(HexType { width, units: None })
    }

    pub fn hex_with_units(width: u32, units: impl Into<String>) -> Self {
        Datatype::Hex(HexType {
            width,
            units: Some(units.into()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Datatype::Enum(_) => "enum",
            Datatype::Bitmask(_) => "bitmask",
            Datatype::Bool(_) => "bool",
            Datatype::Int(_) => "int",
            Datatype::Hex(_) => "hex",
        }
    }

    /// Render a raw value
    pub fn evaluate(&self, value: Value) -> String {
        match self {
            Datatype::Enum(e) | Datatype::Bool(e) => e.evaluate(value),
            Datatype::Bitmask(b) => b.evaluate(value),
            Datatype::Int(i) => with_units(value.to_string(), i.units.as_deref()),
            Datatype::Hex(h) => {
                let digits = h.width.div_ceil(4) as usize;
                with_units(format!("0x{value:0digits$x}"), h.units.as_deref())
            }
        }
    }

    /// Convert a display token into the raw value it names
    ///
    /// Bitmask tokens name a single bit and yield that bit's mask.
    pub fn lookup(&self, token: &str) -> Result<Value> {
        let kind = self.kind();
        match self {
            Datatype::Enum(e) | Datatype::Bool(e) => e.lookup(kind, token),
            Datatype::Bitmask(b) => b
                .bits
                .get(token)
                .map(|bit| 1 << bit)
                .ok_or_else(|| RegtreeError::datatype_invalid(kind, token)),
            Datatype::Int(IntType { units }) | Datatype::Hex(HexType { units, .. }) => {
                let bare = match units {
                    Some(u) => {
                        let token = token.trim();
                        token.strip_suffix(u.as_str()).unwrap_or(token)
                    }
                    None => token,
                };
                parse_number(bare).ok_or_else(|| RegtreeError::datatype_invalid(kind, token))
            }
        }
    }

    /// Validate a raw value, returning its canonical form
    pub fn lookup_value(&self, value: Value) -> Result<Value> {
        let kind = self.kind();
        match self {
            Datatype::Enum(e) => e.lookup_value(kind, value),
            Datatype::Bool(_) => Ok((value != 0) as Value),
            Datatype::Bitmask(b) => {
                if value & !b.declared_mask() == 0 {
                    Ok(value)
                } else {
                    Err(RegtreeError::datatype_invalid(kind, value))
                }
            }
            Datatype::Int(_) | Datatype::Hex(_) => Ok(value),
        }
    }
}

fn with_units(mut text: String, units: Option<&str>) -> String {
    if let Some(units) = units {
        text.push(' ');
        text.push_str(units);
    }
    text
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    Value::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_states() -> Datatype {
        Datatype::enumeration([("D0", 0), ("D1", 1), ("D2", 2), ("D3hot", 3)])
    }

    #[test]
    fn test_enum_round_trips_declared_pairs() {
        let dt = power_states();
        for (name, value) in [("D0", 0), ("D1", 1), ("D2", 2), ("D3hot", 3)] {
            assert_eq!(dt.lookup(&dt.evaluate(value)).unwrap(), value);
            assert_eq!(dt.evaluate(dt.lookup(name).unwrap()), name);
        }
    }

    #[test]
    fn test_enum_unknown_values() {
        let dt = power_states();
        assert_eq!(dt.evaluate(7), "<!7!>");
        assert!(matches!(
            dt.lookup_value(7),
            Err(RegtreeError::DatatypeInvalid { .. })
        ));
        assert!(dt.lookup("D4").is_err());
        assert_eq!(dt.lookup_value(2).unwrap(), 2);

        let custom = Datatype::Enum(EnumType::new([("on", 1)]).with_unknown("reserved"));
        assert_eq!(custom.evaluate(9), "reserved");
    }

    #[test]
    fn test_enum_duplicates_keep_first() {
        let dt = Datatype::enumeration([("a", 1), ("b", 2), ("a", 3)]);
        assert_eq!(dt.lookup("a").unwrap(), 1);
        assert_eq!(dt.evaluate(3), "<!3!>");

        // duplicate values render as the first declared name
        let aliased = Datatype::enumeration([("x", 5), ("y", 5)]);
        assert_eq!(aliased.evaluate(5), "x");
    }

    #[test]
    fn test_bitmask_evaluate() {
        let dt = Datatype::bitmask([("fpu", 0), ("tsc", 4), ("msr", 5)]).unwrap();
        assert_eq!(dt.evaluate(0), "");
        assert_eq!(dt.evaluate(0b110001), "fpu tsc msr");
        assert_eq!(dt.evaluate((1 << 4) | (1 << 9) | (1 << 2)), "tsc <!2!> <!9!>");
        assert_eq!(dt.lookup("msr").unwrap(), 1 << 5);
        assert!(dt.lookup("fpu tsc").is_err());
        assert!(dt.lookup_value(0b100).is_err());
        assert_eq!(dt.lookup_value(0b10001).unwrap(), 0b10001);
    }

    #[test]
    fn test_bitmask_declaration_order() {
        let dt = Datatype::bitmask([("high", 7), ("low", 1)]).unwrap();
        assert_eq!(dt.evaluate(0x82), "high low");
        assert!(Datatype::bitmask([("oops", 128)]).is_err());
    }

    #[test]
    fn test_bool() {
        let dt = Datatype::boolean("enabled", "disabled");
        assert_eq!(dt.evaluate(1), "enabled");
        assert_eq!(dt.evaluate(0), "disabled");
        assert_eq!(dt.evaluate(2), "<!2!>");
        assert_eq!(dt.lookup("disabled").unwrap(), 0);
        assert_eq!(dt.lookup_value(42).unwrap(), 1);
        assert_eq!(dt.lookup_value(0).unwrap(), 0);
    }

    #[test]
    fn test_int_and_hex() {
        let mhz = Datatype::int_with_units("MHz");
        assert_eq!(mhz.evaluate(2400), "2400 MHz");
        assert_eq!(mhz.lookup("2400 MHz").unwrap(), 2400);
        assert_eq!(mhz.lookup("0x10").unwrap(), 16);
        assert!(mhz.lookup("fast").is_err());
        assert_eq!(mhz.lookup("5MHz").unwrap(), 5);
        assert!(mhz.lookup("5MHzMHz").is_err());
        assert_eq!(mhz.lookup_value(77).unwrap(), 77);

        let hex = Datatype::hex(16);
        assert_eq!(hex.evaluate(0x2a), "0x002a");
        assert_eq!(hex.lookup("0x002a").unwrap(), 0x2a);
        assert_eq!(Datatype::hex(0).evaluate(0x2a), "0x2a");
        assert_eq!(Datatype::hex(10).evaluate(1), "0x001");
        assert_eq!(Datatype::hex_with_units(8, "pages").evaluate(3), "0x03 pages");
    }

    #[test]
    fn test_parse_number_rejects_signs() {
        assert_eq!(parse_number(" 42 "), Some(42));
        assert_eq!(parse_number("0X1f"), Some(0x1f));
        for bad in ["+5", "-5", "0x+5", "0x-5", "0x", "", "1_000"] {
            assert_eq!(parse_number(bad), None, "{bad}");
        }
        assert!(Datatype::int().lookup("+5").is_err());
    }
}
