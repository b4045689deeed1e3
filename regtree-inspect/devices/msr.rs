//! Architectural MSRs of one CPU

use regtree_raw::{SharedBinding, Value, Width};

use crate::builder::Builder;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::field::FnAccess;

const IA32_TIME_STAMP_COUNTER: Value = 0x10;
const IA32_APIC_BASE: Value = 0x1B;
const MSR_RAPL_POWER_UNIT: Value = 0x606;
const MSR_PKG_ENERGY_STATUS: Value = 0x611;
const MSR_DRAM_ENERGY_STATUS: Value = 0x619;
const MSR_PP0_ENERGY_STATUS: Value = 0x639;

/// Append `msr[]` for `cpu`; RAPL registers are only described when `rapl`
pub fn describe(b: &mut Builder, cpu: u32, binding: SharedBinding, rapl: bool) -> Result<()> {
    b.open_bound_scope("msr[]", binding)?;
    b.bookmark("msr")?;
    b.constant("cpu", Datatype::int(), Value::from(cpu))?;

    let tsc = b.register("%tsc", IA32_TIME_STAMP_COUNTER, Width::W64)?;
    b.field("tsc", Datatype::int(), tsc.all())?;

    let apic = b.register("%apic_base", IA32_APIC_BASE, Width::W64)?;
    b.field("bsp", Datatype::boolean("yes", "no"), apic.bit(8)?)?;
    b.field("x2apic", Datatype::boolean("enabled", "disabled"), apic.bit(10)?)?;
    b.field("apic_enable", Datatype::boolean("enabled", "disabled"), apic.bit(11)?)?;
    b.field("apic_page", Datatype::hex(40), apic.bits(51, 12)?)?;

    if rapl {
        describe_rapl(b)?;
    }
    b.close_scope()
}

fn describe_rapl(b: &mut Builder) -> Result<()> {
    b.open_scope("rapl")?;
    let unit = b.register("%power_unit", MSR_RAPL_POWER_UNIT, Width::W64)?;
    b.field("power_units", Datatype::int(), unit.bits(3, 0)?)?;
    b.field("energy_units", Datatype::int(), unit.bits(12, 8)?)?;
    b.field("time_units", Datatype::int(), unit.bits(19, 16)?)?;
    // one energy tick is 1/2^energy_units J
    b.procedural(
        "energy_tick",
        Datatype::int_with_units("nJ"),
        FnAccess::read_only(|ctx| Ok(1_000_000_000 >> ctx.read("energy_units")?)),
    )?;

    let ticks = b.datatype("ticks", Datatype::int())?;
    for (name, address) in [
        ("pkg_energy", MSR_PKG_ENERGY_STATUS),
        ("dram_energy", MSR_DRAM_ENERGY_STATUS),
        ("pp0_energy", MSR_PP0_ENERGY_STATUS),
    ] {
        let reg = b.register(&format!("%{name}_status"), address, Width::W64)?;
        b.field(name, ticks.clone(), reg.bits(31, 0)?)?;
    }
    b.alias("energy", "pkg_energy")?;
    b.close_scope()
}
