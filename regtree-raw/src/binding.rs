//! Register space bindings
//!
//! A [`Binding`] is one concrete register space: the config space of a single
//! PCI function, the MSRs of one CPU, a window of physical memory, and so on.
//! Every access is an `(address, width)` pair; the binding decides how that
//! maps onto a device file, a mapped page or an instruction.

use std::fmt;
use std::sync::Arc;

use crate::value::{Value, Width};

/// Errors raised by a binding while touching hardware
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("Failed to open {device}: {source}")]
    OpenFailed {
        device: String,
        source: std::io::Error,
    },

    #[error("Failed to read {width} at 0x{address:X} on {device}: {source}")]
    ReadFailed {
        device: String,
        address: Value,
        width: Width,
        source: std::io::Error,
    },

    #[error("Failed to write {width} at 0x{address:X} on {device}: {source}")]
    WriteFailed {
        device: String,
        address: Value,
        width: Width,
        source: std::io::Error,
    },

    #[error("Unsupported {width} access on {device}")]
    UnsupportedWidth { device: String, width: Width },

    #[error("Address 0x{address:X} is outside {device}")]
    OutOfRange { device: String, address: Value },

    #[error("{device} is read-only")]
    ReadOnly { device: String },

    #[error("{device}: {message}")]
    Device { device: String, message: String },
}

pub type Result<T> = std::result::Result<T, BindingError>;

/// Address + width access to one register space
pub trait Binding: fmt::Debug + Send + Sync {
    /// Read `width` bits at `address`; the result is truncated to `width`
    fn read(&self, address: Value, width: Width) -> Result<Value>;

    /// Write the low `width` bits of `value` at `address`
    fn write(&self, address: Value, width: Width, value: Value) -> Result<()>;

    /// Human readable description used in logs and errors
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Bindings are shared by every scope and regbits that reference them
pub type SharedBinding = Arc<dyn Binding>;
