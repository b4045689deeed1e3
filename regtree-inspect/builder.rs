//! Definition-pass builder
//!
//! The builder owns the tree while it is being described and tracks the
//! scope currently open. Lookups made through the builder only see dirents
//! that have already been added, so a field can refer to siblings declared
//! before it.
//!
//! ```
//! use std::sync::Arc;
//! use regtree::{Builder, Datatype};
//! use regtree_raw::{SimBinding, Width};
//!
//! let regs = Arc::new(SimBinding::new("demo").with(0x10, 0x4321));
//! let mut b = Builder::new();
//! b.open_bound_scope("dev", regs)?;
//! let ctl = b.register("%ctl", 0x10, Width::W16)?;
//! b.field("mode", Datatype::hex(8), ctl.bits(11, 8)? + ctl.bits(3, 0)?)?;
//! b.close_scope()?;
//! let tree = b.finish();
//!
//! let mode = tree.resolve_str(tree.root(), "dev/mode")?.unwrap();
//! assert_eq!(tree.evaluate(mode)?, "0x31");
//! # Ok::<(), regtree::RegtreeError>(())
//! ```

use std::sync::Arc;

use regtree_raw::{RegBits, Register, SharedBinding, Value, Width};

use crate::datatype::Datatype;
use crate::error::{RegtreeError, Result};
use crate::field::{Field, FieldAccess};
use crate::tree::{Dirent, DirentId, Scope, Tree};

pub struct Builder {
    tree: Tree,
    current: DirentId,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::from_tree(Tree::new())
    }

    /// Continue describing an existing tree, starting at its root
    pub fn from_tree(tree: Tree) -> Self {
        let current = tree.root();
        Self { tree, current }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Scope currently open
    pub fn current(&self) -> DirentId {
        self.current
    }

    pub fn set_poll_limit(&mut self, limit: u32) {
        self.tree.set_poll_limit(limit);
    }

    /// Open a child scope; `name[]` appends a new element to an array
    pub fn open_scope(&mut self, name: &str) -> Result<DirentId> {
        self.enter(name, Scope::new())
    }

    /// Open a child scope bound to its own register space
    pub fn open_bound_scope(&mut self, name: &str, binding: SharedBinding) -> Result<DirentId> {
        self.enter(name, Scope::bound(binding))
    }

    fn enter(&mut self, name: &str, scope: Scope) -> Result<DirentId> {
        let id = self
            .tree
            .add_dirent(self.current, name, Dirent::Scope(scope))?;
        tracing::debug!("Opened scope {}", self.tree.path_of(id));
        self.current = id;
        Ok(id)
    }

    /// Close the current scope and return to its parent
    pub fn close_scope(&mut self) -> Result<()> {
        if self.tree.is_root(self.current) {
            return Err(RegtreeError::Definition(
                "close_scope called at the root".into(),
            ));
        }
        self.current = self.tree.parent(self.current);
        Ok(())
    }

    pub fn bookmark(&mut self, name: &str) -> Result<()> {
        self.tree.add_bookmark(self.current, name)
    }

    /// Declare a named datatype in the current scope
    pub fn datatype(&mut self, name: &str, datatype: Datatype) -> Result<Arc<Datatype>> {
        let datatype = Arc::new(datatype);
        self.tree
            .add_datatype(self.current, name, Arc::clone(&datatype))?;
        Ok(datatype)
    }

    /// Named datatype visible from the current scope
    pub fn find_datatype(&self, name: &str) -> Result<Arc<Datatype>> {
        self.tree
            .find_datatype(self.current, name)
            .ok_or_else(|| RegtreeError::NotFound(format!("datatype '{name}'")))
    }

    /// Binding in effect for the current scope
    pub fn binding(&self) -> Result<SharedBinding> {
        self.tree.binding(self.current).ok_or_else(|| {
            RegtreeError::Definition(format!(
                "no binding in effect at {}",
                self.tree.path_of(self.current)
            ))
        })
    }

    /// Declare a whole-register hex field and return the register for
    /// carving out bit ranges
    pub fn register(&mut self, name: &str, address: Value, width: Width) -> Result<Register> {
        let reg = Register::new(self.binding()?, address, width);
        self.field(name, Datatype::hex(width.bits()), reg.all())?;
        Ok(reg)
    }

    pub fn field(
        &mut self,
        name: &str,
        datatype: impl Into<Arc<Datatype>>,
        regbits: RegBits,
    ) -> Result<DirentId> {
        self.add(name, Field::direct(datatype.into(), regbits))
    }

    /// A field mirrored at several independent locations
    pub fn field_multi(
        &mut self,
        name: &str,
        datatype: impl Into<Arc<Datatype>>,
        regbits: Vec<RegBits>,
    ) -> Result<DirentId> {
        self.add(name, Field::direct_multi(datatype.into(), regbits))
    }

    pub fn constant(
        &mut self,
        name: &str,
        datatype: impl Into<Arc<Datatype>>,
        value: Value,
    ) -> Result<DirentId> {
        self.add(name, Field::constant(datatype.into(), value))
    }

    pub fn procedural(
        &mut self,
        name: &str,
        datatype: impl Into<Arc<Datatype>>,
        access: impl FieldAccess + 'static,
    ) -> Result<DirentId> {
        self.add(name, Field::procedural(datatype.into(), access))
    }

    fn add(&mut self, name: &str, field: Field) -> Result<DirentId> {
        self.tree
            .add_dirent(self.current, name, Dirent::Field(field))
    }

    /// Alias `name` to `target`, resolved lazily relative to the current scope
    pub fn alias(&mut self, name: &str, target: &str) -> Result<DirentId> {
        crate::path::Path::parse(target)?;
        self.tree
            .add_dirent(self.current, name, Dirent::alias(target))
    }

    /// Resolve `path` among what has been defined so far
    pub fn lookup(&self, path: &str) -> Result<Option<DirentId>> {
        self.tree.resolve_str(self.current, path)
    }

    /// Whether `path` already names a dirent
    pub fn defined(&self, path: &str) -> bool {
        self.tree.dirent_defined(self.current, path)
    }

    /// Read an already-defined field, e.g. to decide what to define next
    pub fn read(&self, path: &str) -> Result<Value> {
        self.tree.read_path(self.current, path)
    }

    /// Finish the definition pass and hand over the tree
    pub fn finish(self) -> Tree {
        if !self.tree.is_root(self.current) {
            tracing::warn!(
                "Definition finished with {} still open",
                self.tree.path_of(self.current)
            );
        }
        self.tree
    }
}
