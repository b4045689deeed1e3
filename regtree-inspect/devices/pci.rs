//! PCI functions
//!
//! Every function gets the common configuration header. Skylake-SP memory
//! controller channels additionally expose their uncore PMU registers.

use regtree_raw::{Value, Width};

use crate::builder::Builder;
use crate::datatype::Datatype;
use crate::discovery::Discovered;
use crate::drivers::pci::{PciCriteria, PciDriver};
use crate::error::Result;

const VENDOR_INTEL: u16 = 0x8086;

/// Skylake-SP IMC channel functions
const IMC_DEVICE_IDS: [u16; 3] = [0x2042, 0x2046, 0x204A];

const IMC_BOX_CTL: Value = 0xF4;
const IMC_CTL0: Value = 0xD8;
const IMC_CTR0: Value = 0xA0;
const IMC_COUNTERS: Value = 4;

/// Type 0/1 common header; the current scope must be bound to the function
pub fn describe_header(b: &mut Builder) -> Result<()> {
    let id = b.register("%id", 0x00, Width::W32)?;
    b.field("vendor_id", Datatype::hex(16), id.bits(15, 0)?)?;
    b.field("device_id", Datatype::hex(16), id.bits(31, 16)?)?;

    let enabled = b.datatype("enabled", Datatype::boolean("enabled", "disabled"))?;
    let command = b.register("%command", 0x04, Width::W16)?;
    b.field("io", enabled.clone(), command.bit(0)?)?;
    b.field("memory", enabled.clone(), command.bit(1)?)?;
    b.field("bus_master", enabled.clone(), command.bit(2)?)?;
    b.field("serr", enabled.clone(), command.bit(8)?)?;
    b.field("intx_disable", Datatype::boolean("yes", "no"), command.bit(10)?)?;

    let status = b.register("%status", 0x06, Width::W16)?;
    b.field("capabilities", Datatype::boolean("yes", "no"), status.bit(4)?)?;

    let class = b.register("%class", 0x08, Width::W32)?;
    b.field("revision", Datatype::hex(8), class.bits(7, 0)?)?;
    b.field("class_code", Datatype::hex(24), class.bits(31, 8)?)?;

    let header = b.register("%header_type", 0x0E, Width::W8)?;
    b.field(
        "layout",
        Datatype::enumeration([("normal", 0), ("bridge", 1), ("cardbus", 2)]),
        header.bits(6, 0)?,
    )?;
    b.field("multifunction", Datatype::boolean("yes", "no"), header.bit(7)?)?;

    // BARs only mean something for a normal header
    if b.read("layout")? == 0 {
        for offset in (0x10..=0x24).step_by(4) {
            let bar = regtree_raw::Register::new(b.binding()?, offset, Width::W32);
            b.field("bar[]", Datatype::hex(32), bar.all())?;
        }
        let subsystem = b.register("%subsystem", 0x2C, Width::W32)?;
        b.field("subsystem_vendor", Datatype::hex(16), subsystem.bits(15, 0)?)?;
        b.field("subsystem_id", Datatype::hex(16), subsystem.bits(31, 16)?)?;
    }

    let irq = b.register("%interrupt", 0x3C, Width::W16)?;
    b.field("interrupt_line", Datatype::int(), irq.bits(7, 0)?)?;
    b.field(
        "interrupt_pin",
        Datatype::enumeration([("none", 0), ("INTA", 1), ("INTB", 2), ("INTC", 3), ("INTD", 4)]),
        irq.bits(15, 8)?,
    )?;
    Ok(())
}

/// Uncore PMU of one memory controller channel
fn describe_imc(b: &mut Builder) -> Result<()> {
    b.open_scope("pmu")?;
    let box_ctl = b.register("%box_ctl", IMC_BOX_CTL, Width::W32)?;
    b.field("freeze", Datatype::boolean("yes", "no"), box_ctl.bit(8)?)?;
    b.field("reset", Datatype::boolean("yes", "no"), box_ctl.bit(16)?)?;

    for i in 0..IMC_COUNTERS {
        b.open_scope("counter[]")?;
        let ctl = b.register("%ctl", IMC_CTL0 + 4 * i, Width::W32)?;
        b.field("event", Datatype::hex(8), ctl.bits(7, 0)?)?;
        b.field("umask", Datatype::hex(8), ctl.bits(15, 8)?)?;
        b.field("enable", Datatype::boolean("yes", "no"), ctl.bit(22)?)?;
        let ctr = b.register("%ctr", IMC_CTR0 + 8 * i, Width::W64)?;
        b.field("count", Datatype::int(), ctr.bits(47, 0)?)?;
        b.close_scope()?;
    }
    b.alias("frozen", "freeze")?;
    b.close_scope()
}

fn open_function(b: &mut Builder, found: &Discovered<PciCriteria>) -> Result<()> {
    let address = found.address;
    b.open_bound_scope("pci[]", found.binding.clone())?;
    b.bookmark("pci")?;
    b.constant("segment", Datatype::hex(16), Value::from(address.segment))?;
    b.constant("bus", Datatype::hex(8), Value::from(address.bus))?;
    b.constant("device", Datatype::hex(8), Value::from(address.device))?;
    b.constant("function", Datatype::int(), Value::from(address.function))?;
    describe_header(b)
}

/// Register the PCI descriptions with `driver`
pub fn register(driver: &mut PciDriver) -> Result<()> {
    let registry = driver.registry();
    for device in IMC_DEVICE_IDS {
        registry.register(PciCriteria::new(VENDOR_INTEL, device), |b, found| {
            open_function(b, found)?;
            describe_imc(b)?;
            b.close_scope()
        });
    }
    registry.register_catch_all(|b, found| {
        open_function(b, found)?;
        b.close_scope()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Driver;
    use crate::drivers::pci::PciAddress;
    use regtree_raw::{SharedBinding, SimBinding};
    use std::sync::Arc;

    fn imc_channel() -> Arc<SimBinding> {
        Arc::new(
            SimBinding::new("imc")
                .with(0x00, 0x2042_8086)
                .with(0x04, 0x0006)
                .with(0x08, 0x0880_0000)
                .with(0xA8, 0xFFFF_0000_0000_1234)
                .with(0xDC, 0x0040_0304),
        )
    }

    fn bridge() -> Arc<SimBinding> {
        Arc::new(
            SimBinding::new("bridge")
                .with(0x00, 0x1450_1022)
                .with(0x0E, 0x81)
                .with(0x3C, 0x010b),
        )
    }

    fn discover() -> (crate::tree::Tree, Arc<SimBinding>) {
        let imc = imc_channel();
        let other = bridge();
        let (a, b) = (imc.clone(), other.clone());
        let mut driver = PciDriver::with_source(
            || Ok(vec![PciAddress::new(0, 0x3a, 0x0a, 2), PciAddress::new(0, 0, 0, 0)]),
            move |address| {
                if address.device == 0x0a {
                    a.clone() as SharedBinding
                } else {
                    b.clone() as SharedBinding
                }
            },
        );
        register(&mut driver).unwrap();
        let mut builder = Builder::new();
        assert_eq!(driver.discover(&mut builder).unwrap(), 2);
        (builder.finish(), imc)
    }

    #[test]
    fn test_header_fields() {
        let (tree, _) = discover();
        let eval = |path: &str| {
            let id = tree.resolve_str_follow(tree.root(), path).unwrap().unwrap();
            tree.evaluate(id).unwrap()
        };
        assert_eq!(eval("pci[0]/vendor_id"), "0x8086");
        assert_eq!(eval("pci[0]/device_id"), "0x2042");
        assert_eq!(eval("pci[0]/bus"), "0x3a");
        assert_eq!(eval("pci[0]/memory"), "enabled");
        assert_eq!(eval("pci[0]/io"), "disabled");
        assert_eq!(eval("pci[0]/class_code"), "0x088000");
        assert_eq!(eval("pci[0]/layout"), "normal");
        assert_eq!(eval("pci[0]/pmu/frozen"), "no");
        assert!(tree.dirent_defined(tree.root(), "pci[0]/bar[5]"));

        assert_eq!(eval("pci[1]/layout"), "bridge");
        assert_eq!(eval("pci[1]/multifunction"), "yes");
        assert_eq!(eval("pci[1]/interrupt_pin"), "INTA");
        assert!(!tree.dirent_defined(tree.root(), "pci[1]/bar"));
        assert!(!tree.dirent_defined(tree.root(), "pci[1]/pmu"));
    }

    #[test]
    fn test_imc_counters() {
        let (tree, imc) = discover();
        let root = tree.root();
        assert_eq!(tree.read_path(root, "pci[0]/pmu/counter[1]/count").unwrap(), 0x1234);
        assert_eq!(tree.read_path(root, "pci[0]/pmu/counter[1]/event").unwrap(), 0x04);
        assert_eq!(tree.read_path(root, "pci[0]/pmu/counter[1]/umask").unwrap(), 0x03);
        assert_eq!(tree.read_path(root, "pci[0]/pmu/counter[-3]/enable").unwrap(), 1);

        let freeze = tree.resolve_str(root, "pci[0]/pmu/freeze").unwrap().unwrap();
        tree.write(freeze, 1).unwrap();
        assert_eq!(imc.get(IMC_BOX_CTL), 0x100);
        let ctr0 = tree.resolve_str(root, "pci[0]/pmu/counter[0]/%ctr").unwrap().unwrap();
        assert_eq!(tree.path_of(ctr0), "/pci[0]/pmu/counter[0]/%ctr");
        let frozen = tree
            .resolve_follow(root, &"pci[0]/pmu/frozen".parse().unwrap())
            .unwrap();
        assert_eq!(frozen, Some(freeze));
    }
}
