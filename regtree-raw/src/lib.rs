//! # regtree-raw
//!
//! Register primitives for path-addressed hardware register trees.
//!
//! This crate holds the pieces that sit directly on top of hardware access:
//! raw [`Value`]s and access [`Width`]s, the [`Binding`] trait implemented by
//! every register space (MSR, PCI config space, CPUID, physical memory, port
//! I/O), and the [`RegBits`] algebra that stitches bits from one or more
//! registers into a single logical field. [`KeyedVec`] is the ordered map
//! used for every name table built on top of these primitives.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use regtree_raw::{Binding, Register, SimBinding, Width};
//!
//! let regs = Arc::new(SimBinding::new("demo"));
//! let ctl = Register::new(regs.clone(), 0x10, Width::W32);
//!
//! let enable = ctl.bit(0)?;
//! enable.write(1)?;
//! assert_eq!(regs.read(0x10, Width::W32)?, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binding;
pub mod keyed_vec;
pub mod msr;
pub mod register;
pub mod sim;
pub mod value;

pub use binding::{Binding, BindingError, Result, SharedBinding};
pub use keyed_vec::KeyedVec;
pub use msr::{msr_path, read_msr, write_msr, MsrFile};
pub use register::{RangeError, RegBits, Register};
pub use sim::SimBinding;
pub use value::{mask, Value, Width, VALUE_BITS};
