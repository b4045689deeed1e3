//! Physical memory windows mapped from `/dev/mem`

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regtree_raw::{Binding, BindingError, SharedBinding, Value, Width};

use crate::config::Config;
use crate::discovery::{arg, check_args, Driver};
use crate::error::Result;

fn page_size() -> u64 {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as u64,
        _ => 4096,
    }
}

/// A window `[base, base + size)` of a memory device, mapped shared
///
/// Addresses are offsets into the window. Accesses are volatile and must
/// be naturally aligned.
#[derive(Debug)]
pub struct MemBinding {
    device: String,
    base: u64,
    size: u64,
    map: *mut u8,
    map_len: usize,
    /// Offset of `base` within the first mapped page
    skew: usize,
}

// The mapping is only touched through volatile reads and writes of single
// registers.
unsafe impl Send for MemBinding {}
unsafe impl Sync for MemBinding {}

impl MemBinding {
    pub fn open(path: &Path, base: u64, size: u64) -> regtree_raw::Result<Self> {
        let device = format!("{}@0x{:x}+0x{:x}", path.display(), base, size);
        if size == 0 {
            return Err(BindingError::Device {
                device,
                message: "empty window".into(),
            });
        }

        let page = page_size();
        let map_base = base & !(page - 1);
        let skew = (base - map_base) as usize;
        let window = base
            .checked_add(size)
            .and_then(|_| usize::try_from(size).ok())
            .and_then(|size| size.checked_add(skew))
            .zip(libc::off_t::try_from(map_base).ok());
        let Some((map_len, map_offset)) = window else {
            return Err(BindingError::OutOfRange {
                device,
                address: Value::from(base),
            });
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BindingError::OpenFailed {
                device: device.clone(),
                source,
            })?;

        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                map_offset,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(BindingError::OpenFailed {
                device,
                source: std::io::Error::last_os_error(),
            });
        }
        tracing::info!("Mapped {}", device);

        Ok(Self {
            device,
            base,
            size,
            map: map as *mut u8,
            map_len,
            skew,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn pointer(&self, address: Value, width: Width) -> regtree_raw::Result<*mut u8> {
        if !matches!(width, Width::W8 | Width::W16 | Width::W32 | Width::W64) {
            return Err(BindingError::UnsupportedWidth {
                device: self.device.clone(),
                width,
            });
        }
        let out_of_range = || BindingError::OutOfRange {
            device: self.device.clone(),
            address,
        };
        let offset = u64::try_from(address).map_err(|_| out_of_range())?;
        let bytes = width.bytes() as u64;
        if offset.checked_add(bytes).map_or(true, |end| end > self.size) {
            return Err(out_of_range());
        }
        let physical = self.base.checked_add(offset).ok_or_else(out_of_range)?;
        if physical % bytes != 0 {
            return Err(BindingError::Device {
                device: self.device.clone(),
                message: format!("unaligned {width} access at 0x{offset:x}"),
            });
        }
        Ok(unsafe { self.map.add(self.skew + offset as usize) })
    }
}

impl Binding for MemBinding {
    fn read(&self, address: Value, width: Width) -> regtree_raw::Result<Value> {
        let ptr = self.pointer(address, width)?;
        let value = unsafe {
            match width {
                Width::W8 => Value::from(std::ptr::read_volatile(ptr)),
                Width::W16 => Value::from(std::ptr::read_volatile(ptr as *const u16)),
                Width::W32 => Value::from(std::ptr::read_volatile(ptr as *const u32)),
                _ => Value::from(std::ptr::read_volatile(ptr as *const u64)),
            }
        };
        tracing::debug!("mem read: {} +0x{:x} = 0x{:x}", self.device, address, value);
        Ok(value)
    }

    fn write(&self, address: Value, width: Width, value: Value) -> regtree_raw::Result<()> {
        let ptr = self.pointer(address, width)?;
        tracing::debug!("mem write: {} +0x{:x} <- 0x{:x}", self.device, address, value);
        unsafe {
            match width {
                Width::W8 => std::ptr::write_volatile(ptr, value as u8),
                Width::W16 => std::ptr::write_volatile(ptr as *mut u16, value as u16),
                Width::W32 => std::ptr::write_volatile(ptr as *mut u32, value as u32),
                _ => std::ptr::write_volatile(ptr as *mut u64, value as u64),
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mem({})", self.device)
    }
}

impl Drop for MemBinding {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map as *mut libc::c_void, self.map_len);
        }
    }
}

/// `mem` driver over `/dev/mem`
pub struct MemDriver {
    path: PathBuf,
}

impl MemDriver {
    pub const NAME: &'static str = "mem";

    pub fn new(config: &Config) -> Self {
        Self::with_device(config.system_path("/dev/mem"))
    }

    pub fn with_device(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Driver for MemDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
        check_args(Self::NAME, args, &["base", "size"])?;
        let base: u64 = arg(Self::NAME, "base", args[0])?;
        let size: u64 = arg(Self::NAME, "size", args[1])?;
        Ok(Arc::new(MemBinding::open(&self.path, base, size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegtreeError;

    fn backing_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("regtree-{name}-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; 3 * page_size() as usize]).unwrap();
        path
    }

    #[test]
    fn test_window_access() {
        let path = backing_file("mem");
        let base = page_size() + 0x40;
        {
            let window = MemBinding::open(&path, base, 0x20).unwrap();
            window.write(0x8, Width::W32, 0xdead_beef).unwrap();
            window.write(0x0, Width::W8, 0x5a).unwrap();
            assert_eq!(window.read(0x8, Width::W32).unwrap(), 0xdead_beef);
            assert_eq!(window.read(0x8, Width::W16).unwrap(), 0xbeef);
            assert_eq!(window.read(0x0, Width::W64).unwrap(), 0x5a);

            assert!(matches!(
                window.read(0x20, Width::W8),
                Err(BindingError::OutOfRange { .. })
            ));
            assert!(matches!(
                window.read(0x1c, Width::W64),
                Err(BindingError::OutOfRange { .. })
            ));
            assert!(matches!(
                window.read(0x2, Width::W32),
                Err(BindingError::Device { .. })
            ));
        }
        let contents = std::fs::read(&path).unwrap();
        let at = (base + 8) as usize;
        assert_eq!(&contents[at..at + 4], &0xdead_beefu32.to_le_bytes());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_window_at_address_limits() {
        let path = backing_file("memlimit");
        assert!(matches!(
            MemBinding::open(&path, u64::MAX - 0xf, 0x20),
            Err(BindingError::OutOfRange { .. })
        ));
        assert!(matches!(
            MemBinding::open(&path, 1 << 63, 0x10),
            Err(BindingError::OutOfRange { .. })
        ));

        let window = MemBinding::open(&path, 0, 0x10).unwrap();
        assert!(matches!(
            window.read(u64::MAX as Value, Width::W8),
            Err(BindingError::OutOfRange { .. })
        ));
        assert!(matches!(
            window.read(Value::MAX, Width::W64),
            Err(BindingError::OutOfRange { .. })
        ));
        drop(window);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_driver_args() {
        let path = backing_file("memdrv");
        let driver = MemDriver::with_device(path.clone());
        assert!(driver.new_binding(&[0, 0x100]).is_ok());
        assert!(matches!(driver.new_binding(&[0]), Err(RegtreeError::Args(_))));
        assert!(matches!(
            driver.new_binding(&[0, 0]),
            Err(RegtreeError::Io(BindingError::Device { .. }))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
