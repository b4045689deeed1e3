//! Concrete register spaces and the drivers that create them

pub mod affinity;
pub mod cpuid;
pub mod mem;
pub mod msr;
pub mod pci;
pub mod port;

pub use affinity::AffinityGuard;
pub use cpuid::{CpuidBinding, CpuidCriteria, CpuidDriver, CpuidIdentity};
pub use mem::{MemBinding, MemDriver};
pub use msr::{MsrBinding, MsrDriver};
pub use pci::{PciAddress, PciBinding, PciCriteria, PciDriver, PciIdentity};
pub use port::{PortBinding, PortDriver};
