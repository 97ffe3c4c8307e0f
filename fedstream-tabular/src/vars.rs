//! Ordered variable sets.

use std::collections::HashMap;
use std::sync::Arc;

/// An ordered, deduplicated set of variable names.
///
/// Defines the output column positions of a batch: column `i` holds values for
/// `vars.name(i)`. The wire format may declare its own variable order and
/// subset, which gets projected onto this order by the parser.
#[derive(Clone, Debug)]
pub struct VarSet {
    names: Vec<Arc<str>>,
    index: HashMap<Arc<str>, usize>,
}

impl VarSet {
    /// Build a variable set from names, dropping duplicates (first wins).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut out = Self {
            names: Vec::new(),
            index: HashMap::new(),
        };
        for name in names {
            out.push(name.into());
        }
        out
    }

    /// An empty variable set (ask-style results).
    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, name: Arc<str>) {
        if !self.index.contains_key(&name) {
            self.index.insert(Arc::clone(&name), self.names.len());
            self.names.push(name);
        }
    }

    /// Number of variables.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no variables are declared (boolean ask results).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column position of `name`, if declared.
    #[inline]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Variable name at column `i`.
    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(|n| n.as_ref())
    }

    /// Iterate names in column order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_ref())
    }
}
