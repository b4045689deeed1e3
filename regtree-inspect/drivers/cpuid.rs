//! CPUID leaves of each CPU, executed pinned to that CPU

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use regtree_raw::{Binding, BindingError, SharedBinding, Value, Width};

use crate::builder::Builder;
use crate::config::Config;
use crate::discovery::{arg, check_args, Discovered, DiscoveryRegistry, Driver, MatchCriteria};
use crate::drivers::affinity::AffinityGuard;
use crate::error::Result;

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Binding address of `leaf`/`subleaf`
pub fn cpuid_address(leaf: u32, subleaf: u32) -> Value {
    Value::from(leaf) | Value::from(subleaf) << 32
}

/// Pack the four result registers into one 128-bit value
pub fn pack(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Value {
    Value::from(eax) | Value::from(ebx) << 32 | Value::from(ecx) << 64 | Value::from(edx) << 96
}

pub fn unpack(value: Value) -> (u32, u32, u32, u32) {
    (
        value as u32,
        (value >> 32) as u32,
        (value >> 64) as u32,
        (value >> 96) as u32,
    )
}

/// CPUID of one CPU; every access runs pinned to that CPU
#[derive(Debug)]
pub struct CpuidBinding {
    cpu: u32,
}

impl CpuidBinding {
    pub fn new(cpu: u32) -> Self {
        Self { cpu }
    }
}

impl Binding for CpuidBinding {
    fn read(&self, address: Value, width: Width) -> regtree_raw::Result<Value> {
        if width != Width::W128 {
            return Err(BindingError::UnsupportedWidth {
                device: self.describe(),
                width,
            });
        }
        if address >> 64 != 0 {
            return Err(BindingError::OutOfRange {
                device: self.describe(),
                address,
            });
        }
        let (leaf, subleaf) = (address as u32, (address >> 32) as u32);
        let _affinity = AffinityGuard::new(self.cpu).map_err(|e| BindingError::Device {
            device: self.describe(),
            message: e.to_string(),
        })?;
        let (eax, ebx, ecx, edx) = cpuid(leaf, subleaf);
        tracing::debug!(
            "CPUID: CPU {} leaf 0x{:x}.{} = {:08x} {:08x} {:08x} {:08x}",
            self.cpu,
            leaf,
            subleaf,
            eax,
            ebx,
            ecx,
            edx
        );
        Ok(pack(eax, ebx, ecx, edx))
    }

    fn write(&self, _address: Value, _width: Width, _value: Value) -> regtree_raw::Result<()> {
        Err(BindingError::ReadOnly {
            device: self.describe(),
        })
    }

    fn describe(&self) -> String {
        format!("cpuid(cpu {})", self.cpu)
    }
}

/// Display family, model and stepping from leaf 1 `eax`
pub fn decode_signature(eax: u32) -> (u32, u32, u32) {
    let stepping = eax & 0xF;
    let model = (eax >> 4) & 0xF;
    let family = (eax >> 8) & 0xF;
    let extended_model = (eax >> 16) & 0xF;
    let extended_family = (eax >> 20) & 0xFF;

    let display_family = if family == 0xF {
        family + extended_family
    } else {
        family
    };
    let display_model = if family == 0x6 || family == 0xF {
        (extended_model << 4) + model
    } else {
        model
    };
    (display_family, display_model, stepping)
}

/// Short vendor name from the leaf 0 vendor string
pub fn vendor_name(ebx: u32, ecx: u32, edx: u32) -> String {
    let mut raw = Vec::with_capacity(12);
    for reg in [ebx, edx, ecx] {
        raw.extend_from_slice(&reg.to_le_bytes());
    }
    let raw = String::from_utf8_lossy(&raw);
    match raw.as_ref() {
        "GenuineIntel" => "Intel".to_string(),
        "AuthenticAMD" => "AMD".to_string(),
        other => other.trim_end_matches('\0').to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuidIdentity {
    pub vendor: String,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl CpuidIdentity {
    pub fn probe(binding: &dyn Binding) -> regtree_raw::Result<Self> {
        let (_, ebx, ecx, edx) = unpack(binding.read(cpuid_address(0, 0), Width::W128)?);
        let (eax, ..) = unpack(binding.read(cpuid_address(1, 0), Width::W128)?);
        let (family, model, stepping) = decode_signature(eax);
        Ok(Self {
            vendor: vendor_name(ebx, ecx, edx),
            family,
            model,
            stepping,
        })
    }
}

impl fmt::Display for CpuidIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} family 0x{:x} model 0x{:x} stepping 0x{:x}",
            self.vendor, self.family, self.model, self.stepping
        )
    }
}

/// Vendor plus inclusive family, model and stepping ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuidCriteria {
    pub vendor: String,
    pub family: RangeInclusive<u32>,
    pub model: RangeInclusive<u32>,
    pub stepping: RangeInclusive<u32>,
}

impl CpuidCriteria {
    pub fn new(
        vendor: impl Into<String>,
        family: RangeInclusive<u32>,
        model: RangeInclusive<u32>,
        stepping: RangeInclusive<u32>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            family,
            model,
            stepping,
        }
    }

    /// Any CPU from `vendor`
    pub fn vendor(vendor: impl Into<String>) -> Self {
        Self::new(vendor, 0..=u32::MAX, 0..=u32::MAX, 0..=u32::MAX)
    }
}

impl MatchCriteria for CpuidCriteria {
    type Address = u32;
    type Identity = CpuidIdentity;

    fn matches(&self, id: &CpuidIdentity) -> bool {
        self.vendor == id.vendor
            && self.family.contains(&id.family)
            && self.model.contains(&id.model)
            && self.stepping.contains(&id.stepping)
    }
}

type BindingFactory = Box<dyn Fn(u32) -> SharedBinding + Send>;

/// `cpuid` driver; instances are the configured CPUs
pub struct CpuidDriver {
    cpus: Vec<u32>,
    factory: BindingFactory,
    registry: DiscoveryRegistry<CpuidCriteria>,
}

impl CpuidDriver {
    pub const NAME: &'static str = "cpuid";

    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_source(config.cpu_list()?, |cpu| {
            Arc::new(CpuidBinding::new(cpu)) as SharedBinding
        }))
    }

    pub fn with_source<F>(cpus: Vec<u32>, factory: F) -> Self
    where
        F: Fn(u32) -> SharedBinding + Send + 'static,
    {
        Self {
            cpus,
            factory: Box::new(factory),
            registry: DiscoveryRegistry::new(),
        }
    }

    pub fn registry(&mut self) -> &mut DiscoveryRegistry<CpuidCriteria> {
        &mut self.registry
    }
}

impl Driver for CpuidDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding> {
        check_args(Self::NAME, args, &["cpu"])?;
        Ok((self.factory)(arg(Self::NAME, "cpu", args[0])?))
    }

    fn discover(&mut self, builder: &mut Builder) -> Result<usize> {
        let mut described = 0;
        for &cpu in &self.cpus {
            let binding = (self.factory)(cpu);
            let identity = CpuidIdentity::probe(binding.as_ref())?;
            tracing::info!("CPU {}: {}", cpu, identity);
            let found = Discovered {
                address: cpu,
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
