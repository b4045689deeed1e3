//! Model-specific registers of each CPU through its `msr` device node

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use regtree_raw::{msr_path, Binding, BindingError, MsrFile, SharedBinding, Value, Width};

use crate::config::Config;
use crate::discovery::{arg, check_args, Driver};
use crate::error::Result;

/// MSRs of one CPU; the device node is opened on first access
#[derive(Debug)]
pub struct MsrBinding {
    cpu: u32,
    path: PathBuf,
    file: OnceCell<Mutex<MsrFile>>,
}

impl MsrBinding {
    pub fn new(cpu: u32, path: PathBuf) -> Self {
        Self {
            cpu,
            path,
            file: OnceCell::new(),
        }
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    fn file(&self) -> regtree_raw::Result<&Mutex<MsrFile>> {
        self.file.get_or_try_init(|| {
            let file = MsrFile::open(&self.path)?;
            tracing::info!("Opened MSR device {} for CPU {}", file.device(), self.cpu);
            Ok(Mutex::new(file))
        })
    }

    fn check(&self, address: Value, width: Width) -> regtree_raw::Result<u64> {
        if width != Width::W64 {
            return Err(BindingError::UnsupportedWidth {
                device: self.describe(),
                width,
            });
        }
        u64::try_from(address).map_err(|_| BindingError::OutOfRange {
            device: self.describe(),
            address,
        })
    }
}

impl Binding for MsrBinding {
    fn read(&self, address: Value, width: Width) -> regtree_raw::Result<Value> {
        let msr = self.check(address, width)?;
        let value = self.file()?.lock().read(msr)?;
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu,
            msr,
            value
        );
        Ok(Value::from(value))
    }

    fn write(&self, address: Value, width: Width, value: Value) -> regtree_raw::Result<()> {
        let msr = self.check(address, width)?;
        let value = width.truncate(value) as u64;
        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu,
            msr,
            value
        );
        self.file()?.lock().write(msr, value)
    }

    fn describe(&self) -> String {
        format!("msr(cpu {})", self.cpu)
    }
}

/// `msr` driver: one binding per CPU, shared by every caller
pub struct MsrDriver {
    root: PathBuf,
    bindings: RwLock<HashMap<u32, Arc<MsrBinding>>>,
}

impl MsrDriver {
    pub const NAME: &'static str = "msr";

    pub fn new(config: &Config) -> Self {
        Self {
            root: config.root_prefix.clone(),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn binding(&self, cpu: u32) -> Arc<MsrBinding> {
        {
            let bindings = self.bindings.read();
            if let Some(binding) = bindings.get(&cpu) {
                return Arc::clone(binding);
            }
        }

        let mut bindings = self.bindings.write();
        Arc::clone(
            bindings
                .entry(cpu)
                .or_insert_with(|| Arc::new(MsrBinding::new(cpu, msr_path(&self.root, cpu)))),
        )
    }
}

impl Driver for MsrDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
        check_args(Self::NAME, args, &["cpu"])?;
        Ok(self.binding(arg(Self::NAME, "cpu", args[0])?))
    }
}
