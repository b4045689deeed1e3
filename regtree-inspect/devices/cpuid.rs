//! Identification and feature leaves
//!
//! ```text
//! cpu[N]/
//!   %leaf0 %leaf1 ...      raw leaves, eax in bits 31:0 up to edx in 127:96
//!   max_leaf vendor
//!   family model stepping  display values
//!   features features2     leaf 1 edx/ecx flags
//!   base_freq ... / ext_features   vendor specific
//! ```

use regtree_raw::{Value, Width};

use crate::builder::Builder;
use crate::datatype::{Datatype, EnumType};
use crate::discovery::Discovered;
use crate::drivers::cpuid::{cpuid_address, decode_signature, CpuidCriteria, CpuidDriver};
use crate::error::Result;
use crate::field::FnAccess;

const VENDOR_INTEL: Value = 1;
const VENDOR_AMD: Value = 2;

fn vendor_code(vendor: &str) -> Value {
    match vendor {
        "Intel" => VENDOR_INTEL,
        "AMD" => VENDOR_AMD,
        _ => 0,
    }
}

fn leaf1_edx() -> Result<Datatype> {
    Datatype::bitmask([
        ("fpu", 0),
        ("tsc", 4),
        ("msr", 5),
        ("apic", 9),
        ("mtrr", 12),
        ("cmov", 15),
        ("clflush", 19),
        ("mmx", 23),
        ("sse", 25),
        ("sse2", 26),
        ("htt", 28),
    ])
}

fn leaf1_ecx() -> Result<Datatype> {
    Datatype::bitmask([
        ("sse3", 0),
        ("vmx", 5),
        ("ssse3", 9),
        ("sse4_1", 19),
        ("sse4_2", 20),
        ("x2apic", 21),
        ("popcnt", 23),
        ("aes", 25),
        ("avx", 28),
        ("rdrand", 30),
        ("hypervisor", 31),
    ])
}

/// Fields every x86 CPU has; the current scope must be bound to CPUID
pub fn describe_common(b: &mut Builder, cpu: u32, vendor: &str) -> Result<()> {
    b.bookmark("cpu")?;
    b.constant("cpu", Datatype::int(), Value::from(cpu))?;
    b.constant(
        "vendor",
        Datatype::Enum(
            EnumType::new([("Intel", VENDOR_INTEL), ("AMD", VENDOR_AMD)]).with_unknown("other"),
        ),
        vendor_code(vendor),
    )?;

    let leaf0 = b.register("%leaf0", cpuid_address(0, 0), Width::W128)?;
    b.field("max_leaf", Datatype::hex(32), leaf0.bits(31, 0)?)?;

    let leaf1 = b.register("%leaf1", cpuid_address(1, 0), Width::W128)?;
    b.field("%signature", Datatype::hex(32), leaf1.bits(31, 0)?)?;
    b.field("stepping", Datatype::int(), leaf1.bits(3, 0)?)?;
    b.procedural(
        "family",
        Datatype::hex(8),
        FnAccess::read_only(|ctx| {
            let (family, _, _) = decode_signature(ctx.read("%signature")? as u32);
            Ok(Value::from(family))
        }),
    )?;
    b.procedural(
        "model",
        Datatype::hex(8),
        FnAccess::read_only(|ctx| {
            let (_, model, _) = decode_signature(ctx.read("%signature")? as u32);
            Ok(Value::from(model))
        }),
    )?;
    b.field("apic_id", Datatype::int(), leaf1.bits(63, 56)?)?;
    b.field("logical_count", Datatype::int(), leaf1.bits(55, 48)?)?;
    b.field("features", leaf1_edx()?, leaf1.bits(127, 96)?)?;
    b.field("features2", leaf1_ecx()?, leaf1.bits(95, 64)?)?;
    Ok(())
}

/// Frequency leaf 0x16
fn describe_intel(b: &mut Builder) -> Result<()> {
    if b.read("max_leaf")? < 0x16 {
        return Ok(());
    }
    let leaf = b.register("%leaf16", cpuid_address(0x16, 0), Width::W128)?;
    let mhz = b.datatype("mhz", Datatype::int_with_units("MHz"))?;
    b.field("base_freq", mhz.clone(), leaf.bits(15, 0)?)?;
    b.field("max_freq", mhz.clone(), leaf.bits(47, 32)?)?;
    b.field("bus_freq", mhz, leaf.bits(79, 64)?)?;
    Ok(())
}

/// Extended feature leaf 0x80000001
fn describe_amd(b: &mut Builder) -> Result<()> {
    let leaf = b.register("%leaf80000001", cpuid_address(0x8000_0001, 0), Width::W128)?;
    b.field(
        "ext_features",
        Datatype::bitmask([
            ("lahf_lm", 0),
            ("cmp_legacy", 1),
            ("svm", 2),
            ("abm", 5),
            ("sse4a", 6),
            ("topoext", 22),
        ])?,
        leaf.bits(95, 64)?,
    )?;
    Ok(())
}

fn open_cpu(b: &mut Builder, found: &Discovered<CpuidCriteria>) -> Result<()> {
    b.open_bound_scope("cpu[]", found.binding.clone())?;
    describe_common(b, found.address, &found.identity.vendor)
}

/// Register the CPU descriptions with `driver`
pub fn register(driver: &mut CpuidDriver) -> Result<()> {
    let registry = driver.registry();
    registry.register(CpuidCriteria::vendor("Intel"), |b, found| {
        open_cpu(b, found)?;
        describe_intel(b)?;
        b.close_scope()
    });
    registry.register(CpuidCriteria::vendor("AMD"), |b, found| {
        open_cpu(b, found)?;
        describe_amd(b)?;
        b.close_scope()
    });
    registry.register_catch_all(|b, found| {
        open_cpu(b, found)?;
        b.close_scope()
    })
}
