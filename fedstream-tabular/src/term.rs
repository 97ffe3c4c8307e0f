//! RDF term values.
//!
//! A `Term` is the opaque value produced by parsing one column of a result
//! row. Terms are cheap to clone (`Arc`-backed strings) so they can be copied
//! freely between binding rows and output rows.

use std::fmt;
use std::sync::Arc;

/// An RDF value: IRI, blank node, or literal.
///
/// # Invariants
///
/// - `Literal` carries at most one of `lang` / `datatype`; a language-tagged
///   literal never has an explicit datatype IRI
/// - IRIs and blank node labels are stored without their wire delimiters
///   (`<...>` brackets, `_:` prefix)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    /// IRI reference, stored without angle brackets.
    Iri(Arc<str>),
    /// Blank node, stored without the `_:` prefix.
    BlankNode(Arc<str>),
    /// Literal value with optional language tag or datatype IRI.
    Literal {
        /// The lexical form (unescaped).
        lexical: Arc<str>,
        /// Language tag (for language-tagged strings), without the `@`.
        lang: Option<Arc<str>>,
        /// Datatype IRI, without angle brackets.
        datatype: Option<Arc<str>>,
    },
}

impl Term {
    /// Create an IRI term.
    pub fn iri(iri: impl Into<Arc<str>>) -> Self {
        Term::Iri(iri.into())
    }

    /// Create a blank node term from its label.
    pub fn bnode(label: impl Into<Arc<str>>) -> Self {
        Term::BlankNode(label.into())
    }

    /// Create a plain literal.
    pub fn literal(lexical: impl Into<Arc<str>>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: None,
        }
    }

    /// Create a language-tagged literal.
    pub fn literal_lang(lexical: impl Into<Arc<str>>, lang: impl Into<Arc<str>>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: Some(lang.into()),
            datatype: None,
        }
    }

    /// Create a datatyped literal.
    pub fn literal_typed(lexical: impl Into<Arc<str>>, datatype: impl Into<Arc<str>>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: Some(datatype.into()),
        }
    }

    /// Check if this is an IRI term.
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// Check if this is a blank node.
    pub fn is_bnode(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    /// Check if this is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Get the lexical form of a literal, if this is one.
    pub fn lexical(&self) -> Option<&str> {
        match self {
            Term::Literal { lexical, .. } => Some(lexical),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    /// Renders in N-Triples style: `<iri>`, `_:label`, `"lit"@en`, `"lit"^^<dt>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::BlankNode(label) => write!(f, "_:{}", label),
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => {
                write!(f, "\"")?;
                for c in lexical.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")?;
                if let Some(lang) = lang {
                    write!(f, "@{}", lang)?;
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{}>", dt)?;
                }
                Ok(())
            }
        }
    }
}

/// Interned IRIs for the common XSD datatypes.
///
/// Owned by each parser/sender instance (constructor dependency, not ambient
/// static state) so tests can instantiate isolated copies. Cloning an interned
/// `Arc<str>` is a refcount bump.
#[derive(Clone, Debug)]
pub struct WellKnownDatatypes {
    pub xsd_string: Arc<str>,
    pub xsd_boolean: Arc<str>,
    pub xsd_integer: Arc<str>,
    pub xsd_decimal: Arc<str>,
    pub xsd_double: Arc<str>,
}

impl WellKnownDatatypes {
    const XSD: &'static str = "http://www.w3.org/2001/XMLSchema#";

    pub fn new() -> Self {
        Self {
            xsd_string: Arc::from(format!("{}string", Self::XSD)),
            xsd_boolean: Arc::from(format!("{}boolean", Self::XSD)),
            xsd_integer: Arc::from(format!("{}integer", Self::XSD)),
            xsd_decimal: Arc::from(format!("{}decimal", Self::XSD)),
            xsd_double: Arc::from(format!("{}double", Self::XSD)),
        }
    }

    /// Infer the datatype IRI for a bare (unquoted) numeric token.
    ///
    /// Returns integer for pure digit runs, decimal when a dot is present,
    /// double when an exponent is present.
    pub fn numeric_datatype(&self, token: &str) -> Arc<str> {
        if token.contains(['e', 'E']) {
            Arc::clone(&self.xsd_double)
        } else if token.contains('.') {
            Arc::clone(&self.xsd_decimal)
        } else {
            Arc::clone(&self.xsd_integer)
        }
    }
}

impl Default for WellKnownDatatypes {
    fn default() -> Self {
        Self::new()
    }
}
