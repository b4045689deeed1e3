//! Subtree listing and dumping

use std::fmt;

use crate::error::Result;
use crate::tree::{Dirent, DirentId, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEntry {
    Field { path: String, value: String },
    Alias { path: String, target: String },
}

impl DumpEntry {
    pub fn path(&self) -> &str {
        match self {
            DumpEntry::Field { path, .. } | DumpEntry::Alias { path, .. } => path,
        }
    }
}

impl fmt::Display for DumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpEntry::Field { path, value } => write!(f, "{path} = {value}"),
            DumpEntry::Alias { path, target } => write!(f, "{path} -> {target}"),
        }
    }
}

/// Evaluate every field under `from`, depth first in declaration order
///
/// Aliases are reported with their target and not followed. The first
/// failing field aborts the dump.
pub fn dump(tree: &Tree, from: DirentId) -> Result<Vec<DumpEntry>> {
    let mut out = Vec::new();
    dump_into(tree, from, &mut out)?;
    Ok(out)
}

fn dump_into(tree: &Tree, id: DirentId, out: &mut Vec<DumpEntry>) -> Result<()> {
    match tree.get(id) {
        Dirent::Field(_) => {
            let path = tree.path_of(id);
            let value = tree.evaluate(id).map_err(|e| e.at(&path))?;
            out.push(DumpEntry::Field { path, value });
        }
        Dirent::Alias(alias) => out.push(DumpEntry::Alias {
            path: tree.path_of(id),
            target: alias.target().to_string(),
        }),
        Dirent::Scope(scope) => {
            for &child in scope.children().values() {
                dump_into(tree, child, out)?;
            }
        }
        Dirent::Array(array) => {
            for &item in array.items() {
                dump_into(tree, item, out)?;
            }
        }
    }
    Ok(())
}

/// One line of a directory-style listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: &'static str,
    /// Element count for arrays, target for aliases, datatype for fields
    pub detail: String,
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<24} {:<6} {}", self.name, self.kind, self.detail)
    }
}

/// Children of scope `id`; any other dirent lists as itself
pub fn list(tree: &Tree, id: DirentId) -> Vec<ListEntry> {
    let entry = |name: String, child: DirentId| {
        let detail = match tree.get(child) {
            Dirent::Field(field) => field.datatype().kind().to_string(),
            Dirent::Alias(alias) => alias.target().to_string(),
            Dirent::Array(array) => format!("{} x {}", array.len(), array.array_type().name()),
            Dirent::Scope(scope) => match scope.own_binding() {
                Some(binding) => binding.describe(),
                None => String::new(),
            },
        };
        ListEntry {
            name,
            kind: tree.kind(child).name(),
            detail,
        }
    };

    match tree.get(id) {
        Dirent::Scope(scope) => scope
            .children()
            .iter()
            .map(|(name, &child)| entry(name.clone(), child))
            .collect(),
        Dirent::Array(array) => array
            .items()
            .iter()
            .map(|&item| entry(tree.name_of(item).unwrap_or_default(), item))
            .collect(),
        _ => vec![entry(tree.name_of(id).unwrap_or_else(|| "/".into()), id)],
    }
}
