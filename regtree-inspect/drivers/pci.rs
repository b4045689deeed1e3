//! PCI configuration space through `/proc/bus/pci`
//!
//! Functions are enumerated from the procfs directory layout and identified
//! by the vendor and device id at offset 0.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use regtree_raw::{Binding, BindingError, SharedBinding, Value, Width};

use crate::builder::Builder;
use crate::config::Config;
use crate::discovery::{arg, check_args, Discovered, DiscoveryRegistry, Driver, MatchCriteria};
use crate::error::Result;

/// Size of extended config space
pub const CONFIG_SPACE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }

    /// procfs node relative to `/proc/bus/pci`
    pub fn proc_node(&self) -> String {
        if self.segment > 0 {
            format!(
                "{:04x}:{:02x}/{:02x}.{}",
                self.segment, self.bus, self.device, self.function
            )
        } else {
            format!("{:02x}/{:02x}.{}", self.bus, self.device, self.function)
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

/// Parse a procfs bus directory name, `BB` or `SSSS:BB`
fn parse_bus_dir(name: &str) -> Option<(u16, u8)> {
    match name.split_once(':') {
        Some((segment, bus)) => Some((
            u16::from_str_radix(segment, 16).ok()?,
            u8::from_str_radix(bus, 16).ok()?,
        )),
        None => Some((0, u8::from_str_radix(name, 16).ok()?)),
    }
}

/// Parse a procfs function file name, `DD.F`
fn parse_function_file(name: &str) -> Option<(u8, u8)> {
    let (device, function) = name.split_once('.')?;
    let device = u8::from_str_radix(device, 16).ok()?;
    let function = function.parse::<u8>().ok()?;
    (device < 32 && function < 8).then_some((device, function))
}

/// List the functions present under a `/proc/bus/pci` directory
pub fn enumerate(proc_root: &Path) -> Result<Vec<PciAddress>> {
    let mut found = Vec::new();
    for bus_entry in std::fs::read_dir(proc_root)? {
        let bus_entry = bus_entry?;
        let Some((segment, bus)) = bus_entry.file_name().to_str().and_then(parse_bus_dir) else {
            continue;
        };
        if !bus_entry.file_type()?.is_dir() {
            continue;
        }
        for fn_entry in std::fs::read_dir(bus_entry.path())? {
            let fn_entry = fn_entry?;
            if let Some((device, function)) =
                fn_entry.file_name().to_str().and_then(parse_function_file)
            {
                found.push(PciAddress::new(segment, bus, device, function));
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Config space of one PCI function through procfs
#[derive(Debug)]
pub struct PciBinding {
    address: PciAddress,
    path: PathBuf,
    file: OnceCell<Mutex<File>>,
}

impl PciBinding {
    pub fn new(address: PciAddress, proc_root: &Path) -> Self {
        Self {
            address,
            path: proc_root.join(address.proc_node()),
            file: OnceCell::new(),
        }
    }

    fn file(&self) -> regtree_raw::Result<&Mutex<File>> {
        self.file.get_or_try_init(|| {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .or_else(|_| File::open(&self.path))
                .map_err(|source| BindingError::OpenFailed {
                    device: self.path.display().to_string(),
                    source,
                })?;
            tracing::info!("Opened PCI device {}", self.address);
            Ok(Mutex::new(file))
        })
    }

    fn check(&self, address: Value, width: Width) -> regtree_raw::Result<u64> {
        if !matches!(width, Width::W8 | Width::W16 | Width::W32 | Width::W64) {
            return Err(BindingError::UnsupportedWidth {
                device: self.describe(),
                width,
            });
        }
        let in_range = |offset: u64| {
            offset
                .checked_add(width.bytes() as u64)
                .is_some_and(|end| end <= CONFIG_SPACE_SIZE)
        };
        match u64::try_from(address) {
            Ok(offset) if in_range(offset) => Ok(offset),
            _ => Err(BindingError::OutOfRange {
                device: self.describe(),
                address,
            }),
        }
    }
}

impl Binding for PciBinding {
    fn read(&self, address: Value, width: Width) -> regtree_raw::Result<Value> {
        let offset = self.check(address, width)?;
        let mut buffer = [0u8; 8];
        let bytes = &mut buffer[..width.bytes()];
        let mut file = self.file()?.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(bytes))
            .map_err(|source| BindingError::ReadFailed {
                device: self.describe(),
                address,
                width,
                source,
            })?;
        let value = Value::from(u64::from_le_bytes(buffer));
        tracing::debug!("PCI read: {} +0x{:03x} = 0x{:x}", self.address, offset, value);
        Ok(value)
    }

    fn write(&self, address: Value, width: Width, value: Value) -> regtree_raw::Result<()> {
        let offset = self.check(address, width)?;
        let bytes = (width.truncate(value) as u64).to_le_bytes();
        tracing::debug!("PCI write: {} +0x{:03x} <- 0x{:x}", self.address, offset, value);
        let mut file = self.file()?.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(&bytes[..width.bytes()]))
            .map_err(|source| BindingError::WriteFailed {
                device: self.describe(),
                address,
                width,
                source,
            })
    }

    fn describe(&self) -> String {
        format!("pci({})", self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor: u16,
    pub device: u16,
}

impl PciIdentity {
    /// Read vendor and device id from offset 0; `None` for an empty slot
    pub fn probe(binding: &dyn Binding) -> regtree_raw::Result<Option<Self>> {
        let id = binding.read(0, Width::W32)?;
        let vendor = (id & 0xFFFF) as u16;
        if vendor == 0xFFFF {
            return Ok(None);
        }
        Ok(Some(Self {
            vendor,
            device: (id >> 16) as u16,
        }))
    }
}

/// Exact vendor and device id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciCriteria {
    pub vendor: u16,
    pub device: u16,
}

impl PciCriteria {
    pub fn new(vendor: u16, device: u16) -> Self {
        Self { vendor, device }
    }
}

impl MatchCriteria for PciCriteria {
    type Address = PciAddress;
    type Identity = PciIdentity;

    fn matches(&self, identity: &PciIdentity) -> bool {
        self.vendor == identity.vendor && self.device == identity.device
    }
}

type Enumerator = Box<dyn Fn() -> Result<Vec<PciAddress>> + Send>;
type BindingFactory = Box<dyn Fn(PciAddress) -> SharedBinding + Send>;

/// `pci` driver
pub struct PciDriver {
    enumerate: Enumerator,
    factory: BindingFactory,
    registry: DiscoveryRegistry<PciCriteria>,
}

impl PciDriver {
    pub const NAME: &'static str = "pci";

    pub fn new(config: &Config) -> Self {
        let proc_root = config.system_path("/proc/bus/pci");
        let factory_root = proc_root.clone();
        Self::with_source(
            move || enumerate(&proc_root),
            move |address| Arc::new(PciBinding::new(address, &factory_root)) as SharedBinding,
        )
    }

    /// Discover from a custom address list and binding factory
    pub fn with_source<E, F>(enumerate: E, factory: F) -> Self
    where
        E: Fn() -> Result<Vec<PciAddress>> + Send + 'static,
        F: Fn(PciAddress) -> SharedBinding + Send + 'static,
    {
        Self {
            enumerate: Box::new(enumerate),
            factory: Box::new(factory),
            registry: DiscoveryRegistry::new(),
        }
    }

    pub fn registry(&mut self) -> &mut DiscoveryRegistry<PciCriteria> {
        &mut self.registry
    }
}

impl Driver for PciDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
        check_args(Self::NAME, args, &["segment", "bus", "device", "function"])?;
        let address = PciAddress::new(
            arg(Self::NAME, "segment", args[0])?,
            arg(Self::NAME, "bus", args[1])?,
            arg(Self::NAME, "device", args[2])?,
            arg(Self::NAME, "function", args[3])?,
        );
        Ok((self.factory)(address))
    }

    fn discover(&mut self, builder: &mut Builder) -> Result<usize> {
        let addresses = (self.enumerate)()?;
        tracing::info!("Found {} PCI function(s)", addresses.len());
        let mut described = 0;
        for address in addresses {
            let binding = (self.factory)(address);
            let Some(identity) = PciIdentity::probe(binding.as_ref())? else {
                continue;
            };
            let found = Discovered {
                address,
                identity,
                binding,
            };
            if self.registry.dispatch(builder, &found)? {
                described += 1;
            }
        }
        Ok(described)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::error::RegtreeError;
    use regtree_raw::SimBinding;
    use std::collections::HashMap;

    #[test]
    fn test_address_formats() {
        let a = PciAddress::new(0, 0x3a, 0x1f, 3);
        assert_eq!(a.to_string(), "0000:3a:1f.3");
        assert_eq!(a.proc_node(), "3a/1f.3");
        let b = PciAddress::new(1, 0, 2, 0);
        assert_eq!(b.proc_node(), "0001:00/02.0");
    }

    #[test]
    fn test_parse_proc_names() {
        assert_eq!(parse_bus_dir("00"), Some((0, 0)));
        assert_eq!(parse_bus_dir("0001:3a"), Some((1, 0x3a)));
        assert_eq!(parse_bus_dir("devices"), None);
        assert_eq!(parse_function_file("1f.3"), Some((0x1f, 3)));
        assert_eq!(parse_function_file("1f.9"), None);
        assert_eq!(parse_function_file("README"), None);
    }

    #[test]
    fn test_enumerate_and_access_procfs_layout() {
        let root = std::env::temp_dir().join(format!("regtree-pci-{}", std::process::id()));
        std::fs::create_dir_all(root.join("00")).unwrap();
        std::fs::create_dir_all(root.join("0001:02")).unwrap();
        let mut header = vec![0u8; 256];
        header[..4].copy_from_slice(&0x1234_8086u32.to_le_bytes());
        std::fs::write(root.join("00/1f.3"), &header).unwrap();
        std::fs::write(root.join("0001:02/00.0"), &header).unwrap();
        std::fs::write(root.join("devices"), b"").unwrap();

        let found = enumerate(&root).unwrap();
        assert_eq!(
            found,
            vec![PciAddress::new(0, 0, 0x1f, 3), PciAddress::new(1, 2, 0, 0)]
        );

        let binding = PciBinding::new(found[0], &root);
        assert_eq!(binding.read(0, Width::W16).unwrap(), 0x8086);
        assert_eq!(binding.read(2, Width::W16).unwrap(), 0x1234);
        binding.write(4, Width::W16, 0x0406).unwrap();
        assert_eq!(binding.read(4, Width::W32).unwrap(), 0x0406);
        assert!(matches!(
            binding.read(4095, Width::W16),
            Err(BindingError::OutOfRange { .. })
        ));
        assert!(matches!(
            binding.read(0, Width::W128),
            Err(BindingError::UnsupportedWidth { .. })
        ));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_offsets_past_config_space() {
        let binding = PciBinding::new(PciAddress::new(0, 0, 0, 0), Path::new("/nonexistent"));
        for (address, width) in [
            (u64::MAX as Value, Width::W16),
            (u64::MAX as Value - 1, Width::W8),
            (Value::MAX, Width::W32),
            (CONFIG_SPACE_SIZE as Value - 2, Width::W32),
        ] {
            assert!(matches!(
                binding.read(address, width),
                Err(BindingError::OutOfRange { .. })
            ));
            assert!(matches!(
                binding.write(address, width, 0),
                Err(BindingError::OutOfRange { .. })
            ));
        }
    }

    fn sim_driver(devices: Vec<(PciAddress, u32)>) -> PciDriver {
        let bindings: HashMap<PciAddress, Arc<SimBinding>> = devices
            .iter()
            .map(|(a, id)| (*a, Arc::new(SimBinding::new(a.to_string()).with(0, Value::from(*id)))))
            .collect();
        let addresses: Vec<PciAddress> = devices.iter().map(|(a, _)| *a).collect();
        PciDriver::with_source(
            move || Ok(addresses.clone()),
            move |a| match bindings.get(&a) {
                Some(b) => Arc::clone(b) as SharedBinding,
                None => Arc::new(SimBinding::new("absent").with(0, 0xFFFF_FFFF)) as SharedBinding,
            },
        )
    }

    #[test]
    fn test_discovery_dispatch() {
        let mut driver = sim_driver(vec![
            (PciAddress::new(0, 0, 0, 0), 0x2020_8086),
            (PciAddress::new(0, 0, 1, 0), 0xFFFF_FFFF),
            (PciAddress::new(0, 0, 2, 0), 0x1450_1022),
            (PciAddress::new(0, 0, 3, 0), 0x0001_10de),
        ]);
        driver
            .registry()
            .register(PciCriteria::new(0x8086, 0x2020), |b, found| {
                b.open_bound_scope("intel[]", found.binding.clone())?;
                b.constant("device", Datatype::hex(16), Value::from(found.identity.device))?;
                b.close_scope()
            });
        driver
            .registry()
            .register(PciCriteria::new(0x1022, 0x1450), |b, found| {
                b.open_bound_scope("amd[]", found.binding.clone())?;
                b.close_scope()
            });

        let mut b = Builder::new();
        assert_eq!(driver.discover(&mut b).unwrap(), 2);
        let tree = b.finish();
        let device = tree
            .resolve_str(tree.root(), "intel[0]/device")
            .unwrap()
            .unwrap();
        assert_eq!(tree.evaluate(device).unwrap(), "0x2020");
        assert!(tree.dirent_defined(tree.root(), "amd[0]"));
        assert!(!tree.dirent_defined(tree.root(), "intel[1]"));

        let binding = driver.new_binding(&[0, 0, 2, 0]).unwrap();
        assert_eq!(binding.read(0, Width::W32).unwrap(), 0x1450_1022);
        assert!(matches!(
            driver.new_binding(&[0, 0x100, 0, 0]),
            Err(RegtreeError::Args(_))
        ));
        assert!(matches!(driver.new_binding(&[0, 0]), Err(RegtreeError::Args(_))));
    }
}
