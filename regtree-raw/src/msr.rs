//! MSR (Model-Specific Register) read/write primitives
//!
//! Access goes through the `msr` device node of a single CPU. The device
//! only accepts 8-byte accesses at an offset equal to the MSR number.
//! Pinning the calling thread and caching handles are left to callers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::binding::{BindingError, Result};
use crate::value::{Value, Width};

/// Device node for `cpu` under `root` (normally `/`)
pub fn msr_path(root: &Path, cpu: u32) -> PathBuf {
    root.join(format!("dev/cpu/{cpu}/msr"))
}

/// An open `msr` device node
#[derive(Debug)]
pub struct MsrFile {
    file: File,
    device: String,
}

impl MsrFile {
    pub fn open(path: &Path) -> Result<Self> {
        let device = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| BindingError::OpenFailed {
                device: device.clone(),
                source,
            })?;
        Ok(Self { file, device })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Read one MSR
    pub fn read(&mut self, msr: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.file
            .seek(SeekFrom::Start(msr))
            .and_then(|_| self.file.read_exact(&mut buffer))
            .map_err(|source| BindingError::ReadFailed {
                device: self.device.clone(),
                address: Value::from(msr),
                width: Width::W64,
                source,
            })?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Write one MSR
    ///
    /// Writing incorrect values to MSRs can crash the machine.
    pub fn write(&mut self, msr: u64, value: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(msr))
            .and_then(|_| self.file.write_all(&value.to_le_bytes()))
            .map_err(|source| BindingError::WriteFailed {
                device: self.device.clone(),
                address: Value::from(msr),
                width: Width::W64,
                source,
            })
    }
}

/// Read a 64-bit value from an MSR, opening the device for this access only
///
/// ```ignore
/// use regtree_raw::read_msr;
///
/// let tsc = read_msr(0, 0x10)?;
/// ```
pub fn read_msr(cpu: u32, msr: u64) -> Result<u64> {
    MsrFile::open(&msr_path(Path::new("/"), cpu))?.read(msr)
}

/// Write a 64-bit value to an MSR, opening the device for this access only
pub fn write_msr(cpu: u32, msr: u64, value: u64) -> Result<()> {
    MsrFile::open(&msr_path(Path::new("/"), cpu))?.write(msr, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_path() {
        assert_eq!(
            msr_path(Path::new("/"), 3),
            PathBuf::from("/dev/cpu/3/msr")
        );
        assert_eq!(
            msr_path(Path::new("/host"), 0),
            PathBuf::from("/host/dev/cpu/0/msr")
        );
    }

    #[test]
    fn test_open_missing_device() {
        let err = MsrFile::open(Path::new("/nonexistent/dev/cpu/0/msr")).unwrap_err();
        assert!(matches!(err, BindingError::OpenFailed { .. }));
        assert!(err.to_string().contains("Failed to open /nonexistent"));
    }
}
