//! Path resolution against the dirent tree
//!
//! Resolution failures come in three flavours. Malformed path text is an
//! [`RegtreeError::InvalidPath`]. Walking through something that is not a
//! scope, or indexing something that is not an array, is a
//! [`RegtreeError::Conversion`]. A name that simply is not there is not an
//! error at all: the resolver returns `Ok(None)`.

use crate::error::{RegtreeError, Result};
use crate::path::{push_normalized, Element, Index, Path};
use crate::tree::{DirentId, Tree};

/// Bound on alias-to-alias hops before a chain is treated as a loop
const MAX_ALIAS_DEPTH: u32 = 32;

fn record(canon: &mut Option<&mut Vec<Element>>, element: Element) {
    if let Some(out) = canon.as_deref_mut() {
        push_normalized(out, element, false);
    }
}

impl Tree {
    /// Resolve `path` starting at scope `from`
    ///
    /// An alias in the middle of the path is followed; an alias named by the
    /// final element is returned as-is.
    pub fn resolve(&self, from: DirentId, path: &Path) -> Result<Option<DirentId>> {
        self.walk(from, path, false, 0, None)
    }

    /// Like [`Tree::resolve`], but a final alias is followed to its target
    pub fn resolve_follow(&self, from: DirentId, path: &Path) -> Result<Option<DirentId>> {
        self.walk(from, path, true, 0, None)
    }

    /// Parse and resolve path text
    pub fn resolve_str(&self, from: DirentId, path: &str) -> Result<Option<DirentId>> {
        self.resolve(from, &Path::parse(path)?)
    }

    /// Parse and resolve path text, following a final alias
    pub fn resolve_str_follow(&self, from: DirentId, path: &str) -> Result<Option<DirentId>> {
        self.resolve_follow(from, &Path::parse(path)?)
    }

    /// Whether `path` names an existing dirent from `from`
    pub fn dirent_defined(&self, from: DirentId, path: &str) -> bool {
        matches!(self.resolve_str(from, path), Ok(Some(_)))
    }

    /// Resolve `path` and return the normalized relative path from `from` to
    /// the dirent it names
    ///
    /// Aliases, bookmarks and from-end indices are replaced by the concrete
    /// steps they stand for.
    pub fn canonical_path(&self, from: DirentId, path: &Path) -> Result<Option<Path>> {
        let mut canon = Vec::new();
        Ok(self
            .walk(from, path, true, 0, Some(&mut canon))?
            .map(|_| Path::new(false, canon)))
    }

    fn walk(
        &self,
        from: DirentId,
        path: &Path,
        follow_final: bool,
        depth: u32,
        mut canon: Option<&mut Vec<Element>>,
    ) -> Result<Option<DirentId>> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(RegtreeError::conversion(
                path.to_string(),
                "alias chain too deep",
            ));
        }

        let mut current = from;
        if path.is_absolute() {
            while !self.is_root(current) {
                current = self.parent(current);
                record(&mut canon, Element::Parent);
            }
        }

        let elements = path.elements();
        for (i, element) in elements.iter().enumerate() {
            let Some(scope) = self.scope(current) else {
                return Err(RegtreeError::conversion(
                    path.prefix(i).to_string(),
                    "path element is not a scope",
                ));
            };

            current = match element {
                Element::Parent => {
                    record(&mut canon, Element::Parent);
                    self.parent(current)
                }
                Element::Bookmark(name) => {
                    let found = self.ancestors(current).enumerate().find(|(_, id)| {
                        self.scope(*id).is_some_and(|s| s.has_bookmark(name))
                    });
                    let Some((levels, id)) = found else {
                        tracing::debug!("Bookmark ${} not found above {}", name, self.path_of(current));
                        return Ok(None);
                    };
                    for _ in 0..levels {
                        record(&mut canon, Element::Parent);
                    }
                    id
                }
                Element::Name(name) => {
                    let Some(id) = scope.child(name) else {
                        return Ok(None);
                    };
                    record(&mut canon, element.clone());
                    id
                }
                Element::Indexed { name, index } => {
                    let Some(array_id) = scope.child(name) else {
                        return Ok(None);
                    };
                    let array = self.array(array_id).ok_or_else(|| {
                        RegtreeError::conversion(
                            path.prefix(i + 1).to_string(),
                            format!("'{name}' is a {}, not an array", self.kind(array_id).name()),
                        )
                    })?;
                    let Some(item) = array.element(*index) else {
                        return Ok(None);
                    };
                    if let Some(pos) = array.position(item) {
                        record(
                            &mut canon,
                            Element::Indexed {
                                name: name.clone(),
                                index: Index::At(pos),
                            },
                        );
                    }
                    item
                }
            };

            let is_last = i + 1 == elements.len();
            if let Some(alias) = self.alias(current) {
                if !is_last || follow_final {
                    let target = Path::parse(alias.target())?;
                    let mut inner = Vec::new();
                    let inner_canon = if canon.is_some() { Some(&mut inner) } else { None };
                    let Some(resolved) =
                        self.walk(self.parent(current), &target, true, depth + 1, inner_canon)?
                    else {
                        return Ok(None);
                    };
                    if let Some(out) = canon.as_deref_mut() {
                        out.pop();
                        for step in inner {
                            push_normalized(out, step, false);
                        }
                    }
                    current = resolved;
                }
            }
        }
        Ok(Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::field::Field;
    use crate::tree::{Dirent, Scope};
    use std::sync::Arc;

    fn constant(value: u128) -> Dirent {
        Dirent::Field(Field::constant(Arc::new(Datatype::int()), value))
    }

    fn scope() -> Dirent {
        Dirent::Scope(Scope::new())
    }

    /// root/node0/core[] with two cores, each holding `value`
    fn sample() -> (Tree, DirentId, Vec<DirentId>) {
        let mut tree = Tree::new();
        let root = tree.root();
        let node = tree.add_dirent(root, "node0", scope()).unwrap();
        tree.add_bookmark(node, "node").unwrap();
        let mut cores = Vec::new();
        for i in 0..2 {
            let core = tree.add_dirent(node, "core[]", scope()).unwrap();
            tree.add_bookmark(core, "core").unwrap();
            tree.add_dirent(core, "value", constant(i)).unwrap();
            let thread = tree.add_dirent(core, "thread", scope()).unwrap();
            tree.add_dirent(thread, "id", constant(10 + i)).unwrap();
            cores.push(core);
        }
        tree.add_dirent(root, "last_core", Dirent::alias("node0/core[-1]"))
            .unwrap();
        (tree, node, cores)
    }

    #[test]
    fn test_field_through_final_alias() {
        let (mut tree, _, _) = sample();
        let root = tree.root();
        tree.add_dirent(root, "first_value", Dirent::alias("node0/core[0]/value"))
            .unwrap();

        let alias = tree.resolve_str(root, "first_value").unwrap().unwrap();
        assert!(tree.read(alias).is_err());

        let id = tree.resolve_str_follow(root, "first_value").unwrap().unwrap();
        assert_eq!(tree.read(id).unwrap(), 0);
        assert_eq!(tree.path_of(id), "/node0/core[0]/value");
        assert!(tree.resolve_str_follow(root, "missing").unwrap().is_none());
    }

    fn read(tree: &Tree, from: DirentId, path: &str) -> Option<u128> {
        tree.resolve_str(from, path)
            .unwrap()
            .map(|id| tree.read(id).unwrap())
    }

    #[test]
    fn test_array_paths() {
        let (tree, _, _) = sample();
        let root = tree.root();
        assert_eq!(read(&tree, root, "node0/core[-1]/value"), Some(1));
        assert_eq!(read(&tree, root, "node0/core[0]/value"), Some(0));
        assert_eq!(read(&tree, root, "node0/core[5]/value"), None);
        assert_eq!(read(&tree, root, "node0/core[-3]/value"), None);
        assert_eq!(read(&tree, root, "node0/core[]/value"), None);
        assert_eq!(read(&tree, root, "node0/core[0]/../core[1]/value"), Some(1));
    }

    #[test]
    fn test_parent_steps() {
        let (tree, node, _) = sample();
        let root = tree.root();
        let a = tree.resolve_str(root, "node0/core[0]/..").unwrap();
        let b = tree.resolve_str(root, "node0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Some(node));
        assert_eq!(tree.resolve_str(root, "..").unwrap(), Some(root));
    }

    #[test]
    fn test_absolute_paths_ignore_depth() {
        let (tree, node, cores) = sample();
        let root = tree.root();
        let thread = tree.resolve_str(root, "node0/core[1]/thread").unwrap().unwrap();
        for from in [root, node, cores[0], thread] {
            assert_eq!(read(&tree, from, "/node0/core[1]/thread/id"), Some(11));
        }
    }

    #[test]
    fn test_bookmarks() {
        let (tree, node, cores) = sample();
        let thread = tree
            .resolve_str(tree.root(), "node0/core[0]/thread")
            .unwrap()
            .unwrap();
        assert_eq!(tree.resolve_str(thread, "$core").unwrap(), Some(cores[0]));
        assert_eq!(tree.resolve_str(thread, "$node").unwrap(), Some(node));
        assert_eq!(read(&tree, thread, "$core/value"), Some(0));
        // inclusive of the starting scope
        assert_eq!(tree.resolve_str(cores[1], "$core").unwrap(), Some(cores[1]));
        assert_eq!(tree.resolve_str(thread, "$missing").unwrap(), None);
    }

    #[test]
    fn test_aliases() {
        let (tree, _, cores) = sample();
        let root = tree.root();
        // mid-path aliases are followed
        assert_eq!(read(&tree, root, "last_core/value"), Some(1));
        // a final alias is returned unless asked to follow
        let alias = tree.resolve_str(root, "last_core").unwrap().unwrap();
        assert!(tree.alias(alias).is_some());
        let target = tree
            .resolve_follow(root, &Path::parse("last_core").unwrap())
            .unwrap();
        assert_eq!(target, Some(cores[1]));
    }

    #[test]
    fn test_alias_loop_is_an_error() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_dirent(root, "a", Dirent::alias("b")).unwrap();
        tree.add_dirent(root, "b", Dirent::alias("a")).unwrap();
        assert!(matches!(
            tree.resolve_str(root, "a/x").unwrap_err(),
            RegtreeError::Conversion { .. }
        ));
        tree.add_dirent(root, "dangling", Dirent::alias("nowhere")).unwrap();
        assert_eq!(tree.resolve_str(root, "dangling/x").unwrap(), None);
    }

    #[test]
    fn test_error_taxonomy() {
        let (tree, _, _) = sample();
        let root = tree.root();
        assert!(matches!(
            tree.resolve_str(root, "node0/core[0]/value/deeper").unwrap_err(),
            RegtreeError::Conversion { .. }
        ));
        assert!(matches!(
            tree.resolve_str(root, "node0[0]").unwrap_err(),
            RegtreeError::Conversion { .. }
        ));
        assert!(matches!(
            tree.resolve_str(root, "node0//x").unwrap_err(),
            RegtreeError::InvalidPath { .. }
        ));
        assert_eq!(tree.resolve_str(root, "nope").unwrap(), None);
        assert!(tree.dirent_defined(root, "node0/core[1]"));
        assert!(!tree.dirent_defined(root, "node0/core[2]"));
        assert!(!tree.dirent_defined(root, "node0/core[0]/value/x"));
    }

    #[test]
    fn test_canonical_path() {
        let (tree, _, cores) = sample();
        let root = tree.root();
        let canon = |from, text: &str| {
            tree.canonical_path(from, &Path::parse(text).unwrap())
                .unwrap()
                .map(|p| p.to_string())
        };
        assert_eq!(
            canon(root, "node0/core[0]/../core[-1]/value").as_deref(),
            Some("node0/core[1]/value")
        );
        assert_eq!(canon(root, "last_core/thread").as_deref(), Some("node0/core[1]/thread"));
        assert_eq!(canon(cores[0], "/node0").as_deref(), Some("../../node0"));
        assert_eq!(canon(cores[0], "thread/$core/value").as_deref(), Some("value"));
        assert_eq!(canon(root, "missing"), None);
    }
}
