//! x86 I/O port windows through `/dev/port`

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use regtree_raw::{Binding, BindingError, SharedBinding, Value, Width};

use crate::config::Config;
use crate::discovery::{arg, check_args, Driver};
use crate::error::Result;

/// I/O ports `[base, base + size)` through the port device; addresses are
/// offsets into the window
#[derive(Debug)]
pub struct PortBinding {
    device: String,
    file: Mutex<File>,
    base: u64,
    size: u64,
}

impl PortBinding {
    pub fn open(path: &Path, base: u64, size: u64) -> regtree_raw::Result<Self> {
        let device = format!("{}@0x{:x}+0x{:x}", path.display(), base, size);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BindingError::OpenFailed {
                device: device.clone(),
                source,
            })?;
        tracing::info!("Opened {}", device);
        Ok(Self {
            device,
            file: Mutex::new(file),
            base,
            size,
        })
    }

    fn port(&self, address: Value, width: Width) -> regtree_raw::Result<u64> {
        if !matches!(width, Width::W8 | Width::W16 | Width::W32) {
            return Err(BindingError::UnsupportedWidth {
                device: self.device.clone(),
                width,
            });
        }
        let port = u64::try_from(address).ok().and_then(|offset| {
            let end = offset.checked_add(width.bytes() as u64)?;
            if end > self.size {
                return None;
            }
            self.base.checked_add(offset)
        });
        port.ok_or_else(|| BindingError::OutOfRange {
            device: self.device.clone(),
            address,
        })
    }
}

impl Binding for PortBinding {
    fn read(&self, address: Value, width: Width) -> regtree_raw::Result<Value> {
        let port = self.port(address, width)?;
        let mut buffer = [0u8; 4];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(port))
            .and_then(|_| file.read_exact(&mut buffer[..width.bytes()]))
            .map_err(|source| BindingError::ReadFailed {
                device: self.device.clone(),
                address,
                width,
                source,
            })?;
        let value = Value::from(u32::from_le_bytes(buffer));
        tracing::debug!("port read: 0x{:04x} = 0x{:x}", port, value);
        Ok(value)
    }

    fn write(&self, address: Value, width: Width, value: Value) -> regtree_raw::Result<()> {
        let port = self.port(address, width)?;
        let bytes = (width.truncate(value) as u32).to_le_bytes();
        tracing::debug!("port write: 0x{:04x} <- 0x{:x}", port, value);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(port))
            .and_then(|_| file.write_all(&bytes[..width.bytes()]))
            .map_err(|source| BindingError::WriteFailed {
                device: self.device.clone(),
                address,
                width,
                source,
            })
    }

    fn describe(&self) -> String {
        format!("port({})", self.device)
    }
}

/// `port` driver over `/dev/port`
pub struct PortDriver {
    path: PathBuf,
}

impl PortDriver {
    pub const NAME: &'static str = "port";

    pub fn new(config: &Config) -> Self {
        Self::with_device(config.system_path("/dev/port"))
    }

    pub fn with_device(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Driver for PortDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
        check_args(Self::NAME, args, &["base", "size"])?;
        let base: u16 = arg(Self::NAME, "base", args[0])?;
        let size: u64 = arg(Self::NAME, "size", args[1])?;
        if u64::from(base) + size > 0x1_0000 {
            return Err(crate::error::RegtreeError::Args(format!(
                "port window 0x{base:x}+0x{size:x} exceeds the I/O space"
            )));
        }
        Ok(Arc::new(PortBinding::open(&self.path, base.into(), size)?))
    }
}
