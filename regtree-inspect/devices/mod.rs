//! Built-in hardware descriptions and whole-system discovery
//!
//! The system tree has one top-level array per description family:
//!
//! ```text
//! /cpu[i]    CPUID of each configured CPU        (driver "cpuid")
//! /pci[i]    every PCI function found in procfs  (driver "pci")
//! /msr[i]    architectural MSRs of each CPU      (driver "msr")
//! ```

pub mod cpuid;
pub mod msr;
pub mod pci;

use crate::builder::Builder;
use crate::config::Config;
use crate::discovery::Drivers;
use crate::drivers::{CpuidDriver, MemDriver, MsrDriver, PciDriver, PortDriver};
use crate::error::{RegtreeError, Result};
use crate::tree::Tree;

/// Every driver, with the built-in descriptions registered
pub fn drivers(config: &Config) -> Result<Drivers> {
    let mut cpuid = CpuidDriver::new(config)?;
    cpuid::register(&mut cpuid)?;
    let mut pci = PciDriver::new(config);
    pci::register(&mut pci)?;

    let mut drivers = Drivers::new();
    drivers.register(Box::new(cpuid));
    drivers.register(Box::new(pci));
    drivers.register(Box::new(MsrDriver::new(config)));
    drivers.register(Box::new(MemDriver::new(config)));
    drivers.register(Box::new(PortDriver::new(config)));
    Ok(drivers)
}

/// Build the tree for the drivers enabled in `config`
pub fn describe_system(config: &Config, drivers: &mut Drivers) -> Result<Tree> {
    let mut b = Builder::new();
    b.set_poll_limit(config.poll_limit);

    for name in &config.drivers {
        if name == MsrDriver::NAME {
            continue;
        }
        drivers.discover(name, &mut b)?;
    }

    if config.driver_enabled(MsrDriver::NAME) {
        let msr = drivers
            .get(MsrDriver::NAME)
            .ok_or_else(|| RegtreeError::NotFound(format!("driver '{}'", MsrDriver::NAME)))?;
        let cpus = config.cpu_list()?;
        for cpu in &cpus {
            // RAPL is Intel only; without CPUID there is no way to tell
            let rapl = cpu_vendor(&b, *cpu)?.as_deref() == Some("Intel");
            msr::describe(&mut b, *cpu, msr.new_binding(&[(*cpu).into()])?, rapl)?;
        }
        tracing::info!("Described MSRs of {} CPU(s)", cpus.len());
    }

    Ok(b.finish())
}

/// Vendor of the described `cpu[]` entry for `cpu`, if there is one
fn cpu_vendor(b: &Builder, cpu: u32) -> Result<Option<String>> {
    let tree = b.tree();
    let Some(cpus) = b.lookup("/cpu")? else {
        return Ok(None);
    };
    let Some(array) = tree.array(cpus) else {
        return Ok(None);
    };
    for &scope in array.items() {
        let path = format!("{}/cpu", tree.path_of(scope));
        if b.read(&path)? == u128::from(cpu) {
            let vendor = b
                .lookup(&format!("{}/vendor", tree.path_of(scope)))?
                .map(|id| tree.evaluate(id))
                .transpose()?;
            return Ok(vendor);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Driver;
    use crate::drivers::cpuid::{cpuid_address, pack};
    use crate::drivers::pci::PciAddress;
    use regtree_raw::{SharedBinding, SimBinding, Value};
    use std::sync::Arc;

    /// MSR driver stand-in handing out one register file per CPU
    struct SimMsr;

    impl Driver for SimMsr {
        fn name(&self) -> &str {
            MsrDriver::NAME
        }

        fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
            crate::discovery::check_args("msr", args, &["cpu"])?;
            Ok(Arc::new(SimBinding::new("msr").with(0x10, 1000 + args[0])))
        }
    }

    fn sim_drivers() -> Drivers {
        let mut cpuid = CpuidDriver::with_source(vec![0, 1], |cpu| {
            // cpu 1 reports AMD
            let (ebx, ecx, edx) = if cpu == 0 {
                (0x756e_6547, 0x6c65_746e, 0x4965_6e69)
            } else {
                (0x6874_7541, 0x444d_4163, 0x6974_6e65)
            };
            Arc::new(
                SimBinding::new("cpuid")
                    .with(cpuid_address(0, 0), pack(0xd, ebx, ecx, edx))
                    .with(cpuid_address(1, 0), pack(0x0005_0654, 0, 0, 0)),
            ) as SharedBinding
        });
        cpuid::register(&mut cpuid).unwrap();

        let mut pci = PciDriver::with_source(
            || Ok(vec![PciAddress::new(0, 0, 0, 0)]),
            |_| Arc::new(SimBinding::new("pci").with(0, 0x0001_1234)) as SharedBinding,
        );
        pci::register(&mut pci).unwrap();

        let mut drivers = Drivers::new();
        drivers.register(Box::new(cpuid));
        drivers.register(Box::new(pci));
        drivers.register(Box::new(SimMsr));
        drivers
    }

    fn config(drivers: &[&str]) -> Config {
        Config {
            cpus: Some("0-1".into()),
            poll_limit: 5,
            drivers: drivers.iter().map(|d| d.to_string()).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn test_describe_system() {
        let mut drivers = sim_drivers();
        let tree = describe_system(&config(&["cpuid", "pci", "msr"]), &mut drivers).unwrap();
        let root = tree.root();

        assert_eq!(tree.poll_limit(), 5);
        assert!(tree.dirent_defined(root, "cpu[1]/ext_features"));
        assert!(tree.dirent_defined(root, "pci[0]/device_id"));
        assert_eq!(tree.read_path(root, "msr[1]/tsc").unwrap(), 1001);
        assert!(tree.dirent_defined(root, "msr[0]/rapl"));
        assert!(!tree.dirent_defined(root, "msr[1]/rapl"));
    }

    #[test]
    fn test_msr_without_cpuid() {
        let mut drivers = sim_drivers();
        let tree = describe_system(&config(&["msr"]), &mut drivers).unwrap();
        let root = tree.root();
        assert!(!tree.dirent_defined(root, "cpu"));
        assert!(!tree.dirent_defined(root, "msr[0]/rapl"));
        assert_eq!(tree.read_path(root, "msr[0]/tsc").unwrap(), 1000);
    }

    #[test]
    fn test_unknown_or_non_discovering_driver() {
        let mut drivers = sim_drivers();
        assert!(matches!(
            describe_system(&config(&["bogus"]), &mut drivers),
            Err(RegtreeError::NotFound(_))
        ));
        drivers.register(Box::new(MemDriver::with_device("/nonexistent".into())));
        assert!(matches!(
            describe_system(&config(&["mem"]), &mut drivers),
            Err(RegtreeError::DriverNotSupported(_))
        ));
    }
}
