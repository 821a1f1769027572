//! Ordered record of the top-level declarations committed to the session.

use std::fmt;

use cinder_compiler::compiler::ast::{Decl, DeclKind};
use serde::Serialize;

/// Index of a committed declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeclId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclCategory {
    Variable,
    Function,
    Record,
    Enum,
    Typedef,
}

impl DeclCategory {
    pub fn of(decl: &Decl) -> Self {
        match decl.kind {
            DeclKind::Var(_) => DeclCategory::Variable,
            DeclKind::Function(_) => DeclCategory::Function,
            DeclKind::Record(_) => DeclCategory::Record,
            DeclKind::Enum(_) => DeclCategory::Enum,
            DeclKind::Typedef(_) => DeclCategory::Typedef,
        }
    }
}

impl fmt::Display for DeclCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclCategory::Variable => "variable",
            DeclCategory::Function => "function",
            DeclCategory::Record => "record",
            DeclCategory::Enum => "enum",
            DeclCategory::Typedef => "typedef",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclRecord {
    pub name: String,
    pub category: DeclCategory,
    /// Source text of the declaration group.
    pub text: String,
    /// Fragment the declaration came from.
    pub fragment: String,
}

/// Which committed declarations [`TranslationState::dump`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpRange {
    All,
    Last(usize),
    SincePreviousDump,
}

#[derive(Debug, Default)]
pub struct TranslationState {
    decls: Vec<DeclRecord>,
    first: Option<DeclId>,
    last: Option<DeclId>,
    dump_marker: usize,
}

impl TranslationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the declarations of one successfully compiled input.
    pub fn commit(&mut self, records: Vec<DeclRecord>) -> Option<DeclId> {
        if records.is_empty() {
            return self.last;
        }
        let start = self.decls.len();
        self.decls.extend(records);
        self.first.get_or_insert(DeclId(start));
        self.last = Some(DeclId(self.decls.len() - 1));
        self.last
    }

    pub fn first(&self) -> Option<&DeclRecord> {
        self.first.and_then(|id| self.get(id))
    }

    pub fn last(&self) -> Option<&DeclRecord> {
        self.last.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: DeclId) -> Option<&DeclRecord> {
        self.decls.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &DeclRecord)> {
        self.decls.iter().enumerate().map(|(i, d)| (DeclId(i), d))
    }

    /// Declarations in `range`. Every dump moves the "previous dump" marker
    /// to the end.
    pub fn dump(&mut self, range: DumpRange) -> &[DeclRecord] {
        let start = match range {
            DumpRange::All => 0,
            DumpRange::Last(n) => self.decls.len().saturating_sub(n),
            DumpRange::SincePreviousDump => self.dump_marker.min(self.decls.len()),
        };
        self.dump_marker = self.decls.len();
        &self.decls[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> DeclRecord {
        DeclRecord {
            name: name.into(),
            category: DeclCategory::Variable,
            text: format!("int {};", name),
            fragment: "input_line_0".into(),
        }
    }

    fn names(decls: &[DeclRecord]) -> Vec<&str> {
        decls.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn first_is_set_once_and_last_follows_commits() {
        let mut state = TranslationState::new();
        assert!(state.first().is_none());
        state.commit(vec![record("a"), record("b")]);
        state.commit(Vec::new());
        state.commit(vec![record("c")]);
        assert_eq!(state.first().map(|d| d.name.as_str()), Some("a"));
        assert_eq!(state.last().map(|d| d.name.as_str()), Some("c"));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn dump_ranges() {
        let mut state = TranslationState::new();
        state.commit(vec![record("a"), record("b")]);
        assert_eq!(names(state.dump(DumpRange::SincePreviousDump)), vec!["a", "b"]);
        assert!(state.dump(DumpRange::SincePreviousDump).is_empty());
        state.commit(vec![record("c")]);
        assert_eq!(names(state.dump(DumpRange::Last(2))), vec!["b", "c"]);
        assert_eq!(names(state.dump(DumpRange::Last(10))), vec!["a", "b", "c"]);
        assert_eq!(names(state.dump(DumpRange::All)).len(), 3);
    }
}
