//! Prefix → IRI mapping.
//!
//! A server may interleave `!prefix` declarations into the stream; subsequent
//! IRI and datatype tokens may then use the compact `name:local` form. The map
//! is owned per connection (constructor dependency, not ambient static state)
//! so isolated parsers never observe each other's declarations.

use std::sync::Arc;

use rustc_hash::FxHashMap;

/// Mutable prefix table consulted by IRI/datatype parsing.
#[derive(Clone, Debug, Default)]
pub struct PrefixMap {
    entries: FxHashMap<Arc<str>, Arc<str>>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a prefix.
    pub fn insert(&mut self, name: impl Into<Arc<str>>, iri: impl Into<Arc<str>>) {
        self.entries.insert(name.into(), iri.into());
    }

    /// Look up the IRI a prefix expands to.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|iri| iri.as_ref())
    }

    /// Expand a `name:local` token into a full IRI.
    ///
    /// Returns `None` when the token has no colon or the prefix is unknown.
    pub fn expand(&self, token: &str) -> Option<String> {
        let (name, local) = token.split_once(':')?;
        let base = self.entries.get(name)?;
        let mut iri = String::with_capacity(base.len() + local.len());
        iri.push_str(base);
        iri.push_str(local);
        Some(iri)
    }

    /// Number of declared prefixes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
