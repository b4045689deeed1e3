//! Arena-backed register description tree
//!
//! All dirents live in one [`Tree`] and refer to each other by [`DirentId`].
//! Children are owned by the arena; the parent link of each node is a plain
//! id used only for climbing during lookups. The tree is built once during
//! the definition pass and afterwards only grows by array appends.

use std::num::NonZeroU32;
use std::sync::Arc;

use regtree_raw::{KeyedVec, SharedBinding};

use crate::config::DEFAULT_POLL_LIMIT;
use crate::datatype::Datatype;
use crate::error::{RegtreeError, Result};
use crate::field::Field;
use crate::path::{Element, Index};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirentId(NonZeroU32);

impl DirentId {
    fn from_index(index: usize) -> Self {
        let raw = u32::try_from(index + 1)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MAX);
        Self(raw)
    }

    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    Scope,
    Field,
    Array,
    Alias,
}

impl DirentKind {
    pub fn name(&self) -> &'static str {
        match self {
            DirentKind::Scope => "scope",
            DirentKind::Field => "field",
            DirentKind::Array => "array",
            DirentKind::Alias => "alias",
        }
    }
}

/// Named container of dirents, datatypes and bookmarks
#[derive(Debug, Default)]
pub struct Scope {
    binding: Option<SharedBinding>,
    children: KeyedVec<String, DirentId>,
    datatypes: KeyedVec<String, Arc<Datatype>>,
    bookmarks: Vec<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(binding: SharedBinding) -> Self {
        Self {
            binding: Some(binding),
            ..Self::default()
        }
    }

    /// This scope's own binding, without climbing
    pub fn own_binding(&self) -> Option<&SharedBinding> {
        self.binding.as_ref()
    }

    pub fn children(&self) -> &KeyedVec<String, DirentId> {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<DirentId> {
        self.children.get(name).copied()
    }

    pub fn datatypes(&self) -> &KeyedVec<String, Arc<Datatype>> {
        &self.datatypes
    }

    pub fn has_bookmark(&self, name: &str) -> bool {
        self.bookmarks.iter().any(|b| b == name)
    }

    pub fn bookmarks(&self) -> &[String] {
        &self.bookmarks
    }
}

/// Append-only list of same-kind dirents
#[derive(Debug)]
pub struct Array {
    array_type: DirentKind,
    items: Vec<DirentId>,
}

impl Array {
    pub fn array_type(&self) -> DirentKind {
        self.array_type
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[DirentId] {
        &self.items
    }

    /// Element at a non-negative position
    pub fn at(&self, pos: usize) -> Option<DirentId> {
        self.items.get(pos).copied()
    }

    /// Element `n` places from the end, `from_end(1)` being the last
    pub fn from_end(&self, n: usize) -> Option<DirentId> {
        if n == 0 || n > self.items.len() {
            return None;
        }
        self.items.get(self.items.len() - n).copied()
    }

    /// Resolve a read index; appends never name an existing element
    pub fn element(&self, index: Index) -> Option<DirentId> {
        match index {
            Index::Append => None,
            Index::At(pos) => self.at(pos),
            Index::FromEnd(n) => self.from_end(n),
        }
    }

    pub fn position(&self, id: DirentId) -> Option<usize> {
        self.items.iter().position(|&item| item == id)
    }
}

/// Stored path naming another dirent
#[derive(Debug, Clone)]
pub struct Alias {
    target: String,
}

impl Alias {
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[derive(Debug)]
pub enum Dirent {
    Scope(Scope),
    Field(Field),
    Array(Array),
    Alias(Alias),
}

impl Dirent {
    pub fn alias(target: impl Into<String>) -> Self {
        Dirent::Alias(Alias {
            target: target.into(),
        })
    }

    pub fn kind(&self) -> DirentKind {
        match self {
            Dirent::Scope(_) => DirentKind::Scope,
            Dirent::Field(_) => DirentKind::Field,
            Dirent::Array(_) => DirentKind::Array,
            Dirent::Alias(_) => DirentKind::Alias,
        }
    }
}

#[derive(Debug)]
struct Node {
    parent: DirentId,
    dirent: Dirent,
}

#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    poll_limit: u32,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only an unbound root scope
    pub fn new() -> Self {
        let root = DirentId::from_index(0);
        Self {
            nodes: vec![Node {
                parent: root,
                dirent: Dirent::Scope(Scope::new()),
            }],
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    /// A tree whose root scope is bound to `binding`
    pub fn with_root_binding(binding: SharedBinding) -> Self {
        let mut tree = Self::new();
        tree.nodes[0].dirent = Dirent::Scope(Scope::bound(binding));
        tree
    }

    pub fn root(&self) -> DirentId {
        DirentId::from_index(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn poll_limit(&self) -> u32 {
        self.poll_limit
    }

    pub fn set_poll_limit(&mut self, limit: u32) {
        self.poll_limit = limit.max(1);
    }

    fn node(&self, id: DirentId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: DirentId) -> &Dirent {
        &self.node(id).dirent
    }

    pub fn kind(&self, id: DirentId) -> DirentKind {
        self.get(id).kind()
    }

    /// Parent of `id`; the root is its own parent
    pub fn parent(&self, id: DirentId) -> DirentId {
        self.node(id).parent
    }

    pub fn is_root(&self, id: DirentId) -> bool {
        id == self.root()
    }

    pub fn scope(&self, id: DirentId) -> Option<&Scope> {
        match self.get(id) {
            Dirent::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    pub fn field(&self, id: DirentId) -> Option<&Field> {
        match self.get(id) {
            Dirent::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn array(&self, id: DirentId) -> Option<&Array> {
        match self.get(id) {
            Dirent::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn alias(&self, id: DirentId) -> Option<&Alias> {
        match self.get(id) {
            Dirent::Alias(alias) => Some(alias),
            _ => None,
        }
    }

    fn scope_mut(&mut self, id: DirentId) -> Result<&mut Scope> {
        match &mut self.nodes[id.index()].dirent {
            Dirent::Scope(scope) => Ok(scope),
            other => Err(RegtreeError::conversion(
                format!("#{}", id.index()),
                format!("expected a scope, found {}", other.kind().name()),
            )),
        }
    }

    fn alloc(&mut self, parent: DirentId, dirent: Dirent) -> DirentId {
        let id = DirentId::from_index(self.nodes.len());
        self.nodes.push(Node { parent, dirent });
        id
    }

    /// Add `dirent` to `scope` under `name`
    ///
    /// `name[]` appends to the array `name`, creating it on first use. A
    /// plain name inserts or replaces the child. Writing to an explicit index
    /// is not supported.
    pub fn add_dirent(&mut self, scope: DirentId, name: &str, dirent: Dirent) -> Result<DirentId> {
        let element = Element::parse(name)?;
        match element {
            Element::Name(name) => {
                let kind = dirent.kind();
                self.scope_mut(scope)?;
                let id = self.alloc(scope, dirent);
                let replaced = self.scope_mut(scope)?.children.insert(name.clone(), id);
                if replaced.is_some() {
                    tracing::warn!("Redefining '{}' as {}", name, kind.name());
                }
                Ok(id)
            }
            Element::Indexed {
                name,
                index: Index::Append,
            } => self.append(scope, &name, dirent),
            Element::Indexed { .. } => Err(RegtreeError::invalid_path(
                name,
                "direct indexed insertion is not supported, use name[]",
            )),
            Element::Parent | Element::Bookmark(_) => Err(RegtreeError::invalid_path(
                name,
                "not a valid dirent name",
            )),
        }
    }

    fn append(&mut self, scope: DirentId, name: &str, dirent: Dirent) -> Result<DirentId> {
        let kind = dirent.kind();
        let existing = self.scope_mut(scope)?.child(name);
        let array_id = match existing {
            Some(existing) => match self.array(existing) {
                Some(array) if array.array_type == kind => existing,
                Some(array) => {
                    return Err(RegtreeError::conversion(
                        name,
                        format!(
                            "cannot append {} to array of {}",
                            kind.name(),
                            array.array_type.name()
                        ),
                    ))
                }
                None => {
                    return Err(RegtreeError::conversion(
                        name,
                        format!("{} is not an array", self.kind(existing).name()),
                    ))
                }
            },
            None => {
                let array = self.alloc(
                    scope,
                    Dirent::Array(Array {
                        array_type: kind,
                        items: Vec::new(),
                    }),
                );
                self.scope_mut(scope)?.children.insert(name.to_string(), array);
                array
            }
        };
        let id = self.alloc(scope, dirent);
        if let Dirent::Array(array) = &mut self.nodes[array_id.index()].dirent {
            array.items.push(id);
        }
        Ok(id)
    }

    /// Tag `scope` with a bookmark reachable as `$name`
    pub fn add_bookmark(&mut self, scope: DirentId, name: &str) -> Result<()> {
        let scope = self.scope_mut(scope)?;
        if !scope.has_bookmark(name) {
            scope.bookmarks.push(name.to_string());
        }
        Ok(())
    }

    /// Register a named datatype in `scope`
    pub fn add_datatype(
        &mut self,
        scope: DirentId,
        name: &str,
        datatype: Arc<Datatype>,
    ) -> Result<()> {
        if self
            .scope_mut(scope)?
            .datatypes
            .insert(name.to_string(), datatype)
            .is_some()
        {
            tracing::warn!("Redefining datatype '{}'", name);
        }
        Ok(())
    }

    /// Binding for `scope`, climbing to the nearest bound ancestor
    pub fn binding(&self, scope: DirentId) -> Option<SharedBinding> {
        self.ancestors(scope)
            .find_map(|id| self.scope(id).and_then(|s| s.binding.clone()))
    }

    /// Named datatype visible from `scope`, climbing ancestors
    pub fn find_datatype(&self, scope: DirentId, name: &str) -> Option<Arc<Datatype>> {
        self.ancestors(scope)
            .find_map(|id| self.scope(id).and_then(|s| s.datatypes.get(name).cloned()))
    }

    /// `id` followed by each ancestor up to and including the root
    pub fn ancestors(&self, id: DirentId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: Some(id),
        }
    }

    /// Name of `id` as seen from its parent scope, `name[i]` for array items
    pub fn name_of(&self, id: DirentId) -> Option<String> {
        if self.is_root(id) {
            return None;
        }
        let scope = self.scope(self.parent(id))?;
        for (name, &child) in scope.children.iter() {
            if child == id {
                return Some(name.clone());
            }
            if let Some(pos) = self.array(child).and_then(|a| a.position(id)) {
                return Some(format!("{name}[{pos}]"));
            }
        }
        None
    }

    /// Canonical absolute path of `id`
    pub fn path_of(&self, id: DirentId) -> String {
        let mut names = Vec::new();
        let mut current = id;
        while !self.is_root(current) {
            names.push(
                self.name_of(current)
                    .unwrap_or_else(|| format!("#{}", current.index())),
            );
            current = self.parent(current);
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }
}

pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<DirentId>,
}

impl Iterator for Ancestors<'_> {
    type Item = DirentId;

    fn next(&mut self) -> Option<DirentId> {
        let current = self.next?;
        self.next = if self.tree.is_root(current) {
            None
        } else {
            Some(self.tree.parent(current))
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regtree_raw::SimBinding;

    fn constant(value: u128) -> Dirent {
        Dirent::Field(Field::constant(Arc::new(Datatype::int()), value))
    }

    #[test]
    fn test_root_is_its_own_parent() {
        let tree = Tree::new();
        let root = tree.root();
        assert_eq!(tree.parent(root), root);
        assert_eq!(tree.path_of(root), "/");
        assert_eq!(tree.ancestors(root).count(), 1);
    }

    #[test]
    fn test_array_append_and_negative_index() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_dirent(root, "reg[]", constant(1)).unwrap();
        let b = tree.add_dirent(root, "reg[]", constant(2)).unwrap();

        let array_id = tree.scope(root).unwrap().child("reg").unwrap();
        let array = tree.array(array_id).unwrap();
        assert_eq!(array.array_type(), DirentKind::Field);
        assert_eq!(array.items(), &[a, b]);
        assert_eq!(array.from_end(1), Some(b));
        assert_eq!(array.from_end(2), Some(a));
        assert_eq!(array.from_end(3), None);
        assert_eq!(array.element(Index::Append), None);
        assert_eq!(tree.path_of(b), "/reg[1]");
        assert_eq!(tree.parent(b), root);
    }

    #[test]
    fn test_array_kind_is_enforced() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_dirent(root, "x[]", constant(1)).unwrap();
        let err = tree
            .add_dirent(root, "x[]", Dirent::Scope(Scope::new()))
            .unwrap_err();
        assert!(matches!(err, RegtreeError::Conversion { .. }));

        tree.add_dirent(root, "plain", constant(1)).unwrap();
        assert!(tree.add_dirent(root, "plain[]", constant(2)).is_err());
    }

    #[test]
    fn test_direct_index_insert_rejected() {
        let mut tree = Tree::new();
        let root = tree.root();
        let err = tree.add_dirent(root, "x[0]", constant(1)).unwrap_err();
        assert!(matches!(err, RegtreeError::InvalidPath { .. }));
        assert!(tree.add_dirent(root, "..", constant(1)).is_err());
        assert!(tree.add_dirent(root, "9lives", constant(1)).is_err());
    }

    #[test]
    fn test_redefinition_overwrites_in_place() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_dirent(root, "a", constant(1)).unwrap();
        tree.add_dirent(root, "b", constant(2)).unwrap();
        let replacement = tree.add_dirent(root, "a", constant(3)).unwrap();
        let scope = tree.scope(root).unwrap();
        assert_eq!(scope.children().len(), 2);
        assert_eq!(scope.children().at(0), Some(&replacement));
    }

    #[test]
    fn test_binding_climbs_to_bound_ancestor() {
        let sim: SharedBinding = Arc::new(SimBinding::new("pci"));
        let mut tree = Tree::new();
        let root = tree.root();
        assert!(tree.binding(root).is_none());

        let bound = tree
            .add_dirent(root, "dev", Dirent::Scope(Scope::bound(sim.clone())))
            .unwrap();
        let inner = tree
            .add_dirent(bound, "inner", Dirent::Scope(Scope::new()))
            .unwrap();
        let found = tree.binding(inner).unwrap();
        assert!(Arc::ptr_eq(&found, &sim));
        assert_eq!(tree.path_of(inner), "/dev/inner");

        let rooted = Tree::with_root_binding(sim.clone());
        assert!(rooted.binding(rooted.root()).is_some());
    }

    #[test]
    fn test_datatypes_and_bookmarks() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_datatype(root, "yesno", Arc::new(Datatype::boolean("yes", "no")))
            .unwrap();
        let child = tree
            .add_dirent(root, "child", Dirent::Scope(Scope::new()))
            .unwrap();
        tree.add_bookmark(child, "dev").unwrap();
        tree.add_bookmark(child, "dev").unwrap();

        assert!(tree.find_datatype(child, "yesno").is_some());
        assert!(tree.find_datatype(child, "missing").is_none());
        assert_eq!(tree.scope(child).unwrap().bookmarks(), ["dev".to_string()]);
    }
}
