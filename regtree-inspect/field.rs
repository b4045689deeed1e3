//! Fields: named leaves that read, write and interpret register bits
//!
//! A [`Field`] pairs a shared [`Datatype`] with one of three access
//! strategies:
//!
//! - **Direct**: backed by one or more [`RegBits`]. With several regbits the
//!   reads are OR'd together and writes go to every one of them.
//! - **Constant**: a fixed value. Writes are accepted and ignored.
//! - **Procedural**: a [`FieldAccess`] object. Paths used inside the accessor
//!   resolve relative to the scope the field was declared in, so indirect
//!   protocols (index register + data register) keep working no matter where
//!   the field is reached from.

use std::fmt;
use std::sync::Arc;

use regtree_raw::{BindingError, RegBits, Value};

use crate::datatype::Datatype;
use crate::error::{RegtreeError, Result};
use crate::path::Path;
use crate::tree::{DirentId, Tree};

/// User-supplied read/write behaviour for a procedural field
pub trait FieldAccess: Send + Sync {
    fn read(&self, ctx: &AccessContext<'_>) -> Result<Value>;
    fn write(&self, ctx: &AccessContext<'_>, value: Value) -> Result<()>;
}

pub enum FieldKind {
    Direct(Vec<RegBits>),
    Constant(Value),
    Procedural(Box<dyn FieldAccess>),
}

pub struct Field {
    datatype: Arc<Datatype>,
    kind: FieldKind,
}

impl Field {
    pub fn direct(datatype: Arc<Datatype>, regbits: RegBits) -> Self {
        Self::direct_multi(datatype, vec![regbits])
    }

    /// Several independent locations mirroring one logical field
    pub fn direct_multi(datatype: Arc<Datatype>, regbits: Vec<RegBits>) -> Self {
        Self {
            datatype,
            kind: FieldKind::Direct(regbits),
        }
    }

    pub fn constant(datatype: Arc<Datatype>, value: Value) -> Self {
        Self {
            datatype,
            kind: FieldKind::Constant(value),
        }
    }

    pub fn procedural(datatype: Arc<Datatype>, access: impl FieldAccess + 'static) -> Self {
        Self {
            datatype,
            kind: FieldKind::Procedural(Box::new(access)),
        }
    }

    pub fn datatype(&self) -> &Arc<Datatype> {
        &self.datatype
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn lookup(&self, token: &str) -> Result<Value> {
        self.datatype.lookup(token)
    }

    pub fn lookup_value(&self, value: Value) -> Result<Value> {
        self.datatype.lookup_value(value)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Field");
        s.field("datatype", &self.datatype.kind());
        match &self.kind {
            FieldKind::Direct(regbits) => s.field("regbits", regbits),
            FieldKind::Constant(value) => s.field("constant", value),
            FieldKind::Procedural(_) => s.field("procedural", &true),
        };
        s.finish()
    }
}

/// What a procedural accessor sees: the tree and its declaring scope
pub struct AccessContext<'a> {
    tree: &'a Tree,
    scope: DirentId,
}

impl<'a> AccessContext<'a> {
    pub fn new(tree: &'a Tree, scope: DirentId) -> Self {
        Self { tree, scope }
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn scope(&self) -> DirentId {
        self.scope
    }

    /// Resolve `path` from the declaring scope, failing if it does not exist
    pub fn resolve(&self, path: &str) -> Result<DirentId> {
        let parsed = Path::parse(path)?;
        self.tree
            .resolve_follow(self.scope, &parsed)?
            .ok_or_else(|| RegtreeError::NotFound(path.to_string()))
    }

    pub fn read(&self, path: &str) -> Result<Value> {
        self.tree.read(self.resolve(path)?)
    }

    pub fn write(&self, path: &str, value: Value) -> Result<()> {
        self.tree.write(self.resolve(path)?, value)
    }

    /// Read `path` until `value & mask == expected`
    ///
    /// Gives up with [`RegtreeError::Timeout`] after the tree's poll limit.
    pub fn poll(&self, path: &str, mask: Value, expected: Value) -> Result<Value> {
        let id = self.resolve(path)?;
        let limit = self.tree.poll_limit();
        for attempt in 0..limit {
            let value = self.tree.read(id)?;
            if value & mask == expected {
                tracing::debug!("Poll of '{}' satisfied after {} reads", path, attempt + 1);
                return Ok(value);
            }
            std::hint::spin_loop();
        }
        Err(RegtreeError::Timeout {
            path: path.to_string(),
            attempts: limit,
        })
    }
}

/// Index/data register pair with an optional ready bit
///
/// Reading writes `index` to the index register, waits for the ready bit,
/// then reads the data register. Writing sets the index, writes the data
/// register and waits for the ready bit to confirm completion.
#[derive(Debug, Clone)]
pub struct IndirectAccess {
    index_path: String,
    index: Value,
    data_path: String,
    ready: Option<(String, Value)>,
}

impl IndirectAccess {
    pub fn new(index_path: impl Into<String>, index: Value, data_path: impl Into<String>) -> Self {
        Self {
            index_path: index_path.into(),
            index,
            data_path: data_path.into(),
            ready: None,
        }
    }

    /// Wait for `path & mask == mask` around each access
    pub fn with_ready(mut self, path: impl Into<String>, mask: Value) -> Self {
        self.ready = Some((path.into(), mask));
        self
    }

    fn wait_ready(&self, ctx: &AccessContext<'_>) -> Result<()> {
        if let Some((path, mask)) = &self.ready {
            ctx.poll(path, *mask, *mask)?;
        }
        Ok(())
    }
}

impl FieldAccess for IndirectAccess {
    fn read(&self, ctx: &AccessContext<'_>) -> Result<Value> {
        ctx.write(&self.index_path, self.index)?;
        self.wait_ready(ctx)?;
        ctx.read(&self.data_path)
    }

    fn write(&self, ctx: &AccessContext<'_>, value: Value) -> Result<()> {
        ctx.write(&self.index_path, self.index)?;
        ctx.write(&self.data_path, value)?;
        self.wait_ready(ctx)
    }
}

type ReadFn = Box<dyn Fn(&AccessContext<'_>) -> Result<Value> + Send + Sync>;
type WriteFn = Box<dyn Fn(&AccessContext<'_>, Value) -> Result<()> + Send + Sync>;

/// Procedural access from closures
pub struct FnAccess {
    read: ReadFn,
    write: Option<WriteFn>,
}

impl FnAccess {
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: Fn(&AccessContext<'_>) -> Result<Value> + Send + Sync + 'static,
        W: Fn(&AccessContext<'_>, Value) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            read: Box::new(read),
            write: Some(Box::new(write)),
        }
    }

    pub fn read_only<R>(read: R) -> Self
    where
        R: Fn(&AccessContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            read: Box::new(read),
            write: None,
        }
    }
}

impl FieldAccess for FnAccess {
    fn read(&self, ctx: &AccessContext<'_>) -> Result<Value> {
        (self.read)(ctx)
    }

    fn write(&self, ctx: &AccessContext<'_>, value: Value) -> Result<()> {
        match &self.write {
            Some(write) => write(ctx, value),
            None => Err(RegtreeError::Io(BindingError::ReadOnly {
                device: ctx.tree.path_of(ctx.scope),
            })),
        }
    }
}

impl Tree {
    fn require_field(&self, id: DirentId) -> Result<&Field> {
        self.field(id).ok_or_else(|| {
            RegtreeError::conversion(
                self.path_of(id),
                format!("expected a field, found {}", self.kind(id).name()),
            )
        })
    }

    /// Read the raw value of field `id`
    pub fn read(&self, id: DirentId) -> Result<Value> {
        let field = self.require_field(id)?;
        match &field.kind {
            FieldKind::Direct(regbits) => {
                let mut value = 0;
                for bits in regbits {
                    value |= bits.read()?;
                }
                Ok(value)
            }
            FieldKind::Constant(value) => Ok(*value),
            FieldKind::Procedural(access) => {
                access.read(&AccessContext::new(self, self.parent(id)))
            }
        }
    }

    /// Write a raw value to field `id`
    pub fn write(&self, id: DirentId, value: Value) -> Result<()> {
        let field = self.require_field(id)?;
        match &field.kind {
            FieldKind::Direct(regbits) => {
                for bits in regbits {
                    bits.write(value)?;
                }
                Ok(())
            }
            FieldKind::Constant(_) => {
                tracing::debug!("Ignoring write to constant field {}", self.path_of(id));
                Ok(())
            }
            FieldKind::Procedural(access) => {
                access.write(&AccessContext::new(self, self.parent(id)), value)
            }
        }
    }

    /// Read field `id` and render it through its datatype
    pub fn evaluate(&self, id: DirentId) -> Result<String> {
        let value = self.read(id)?;
        Ok(self.require_field(id)?.datatype.evaluate(value))
    }

    /// Convert a display token for field `id` into a raw value
    pub fn lookup(&self, id: DirentId, token: &str) -> Result<Value> {
        self.require_field(id)?.lookup(token)
    }

    /// Resolve `path` from `from` and read the field it names
    pub fn read_path(&self, from: DirentId, path: &str) -> Result<Value> {
        AccessContext::new(self, from).read(path)
    }
}
