//! In-memory register file
//!
//! [`SimBinding`] stores registers in a map keyed by address. Unwritten
//! registers read as zero. It stands in for real hardware in tests and dry
//! runs, and records every write so callers can inspect access order.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::binding::{Binding, BindingError, Result};
use crate::value::{Value, Width};

#[derive(Debug, Default)]
pub struct SimBinding {
    name: String,
    registers: Mutex<HashMap<Value, Value>>,
    writes: Mutex<Vec<(Value, Width, Value)>>,
    read_only: bool,
}

impl SimBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A register file that rejects writes
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::new(name)
        }
    }

    /// Builder-style preload of a register
    pub fn with(self, address: Value, value: Value) -> Self {
        self.set(address, value);
        self
    }

    /// Set a register without recording a write
    pub fn set(&self, address: Value, value: Value) {
        self.registers.lock().insert(address, value);
    }

    pub fn get(&self, address: Value) -> Value {
        self.registers.lock().get(&address).copied().unwrap_or(0)
    }

    /// Writes observed through the [`Binding`] interface, oldest first
    pub fn writes(&self) -> Vec<(Value, Width, Value)> {
        self.writes.lock().clone()
    }
}

impl Binding for SimBinding {
    fn read(&self, address: Value, width: Width) -> Result<Value> {
        let value = width.truncate(self.get(address));
        tracing::debug!(
            "sim read: {} 0x{:x} ({}) = 0x{:x}",
            self.name,
            address,
            width,
            value
        );
        Ok(value)
    }

    fn write(&self, address: Value, width: Width, value: Value) -> Result<()> {
        if self.read_only {
            return Err(BindingError::ReadOnly {
                device: self.name.clone(),
            });
        }
        let value = width.truncate(value);
        tracing::debug!(
            "sim write: {} 0x{:x} ({}) <- 0x{:x}",
            self.name,
            address,
            width,
            value
        );
        self.registers.lock().insert(address, value);
        self.writes.lock().push((address, width, value));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sim:{}", self.name)
    }
}
