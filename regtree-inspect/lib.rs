//! Hierarchical namespace of hardware registers
//!
//! A [`Tree`] holds scopes, arrays, fields and aliases. Fields decode slices
//! of registers reached through a [`regtree_raw::Binding`], and drivers
//! populate the tree by probing the machine and running the descriptions
//! registered for what they find.

pub mod builder;
pub mod config;
pub mod datatype;
pub mod devices;
pub mod discovery;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod field;
pub mod path;
pub mod resolve;
pub mod tree;

pub use builder::Builder;
pub use config::Config;
pub use datatype::{BitmaskType, Datatype, EnumType};
pub use discovery::{Discovered, DiscoveryRegistry, Driver, Drivers, MatchCriteria};
pub use dump::{dump, list, DumpEntry, ListEntry};
pub use error::{RegtreeError, Result};
pub use field::{AccessContext, Field, FieldAccess, FnAccess, IndirectAccess};
pub use path::{Element, Index, Path};
pub use tree::{Dirent, DirentId, DirentKind, Scope, Tree};
