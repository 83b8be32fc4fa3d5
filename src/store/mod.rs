//! Triple store API and implementation
//!
//! ## Structure
//!
//! - `engine.rs`: `Store`, the aggregate root (triple and graph operations, commit, consolidation)
//! - `matching.rs`: the eight subject/predicate/object binding cases
//! - `index.rs`: predicate indexes and related-resource lists
//! - `graphs.rs`, `prefix.rs`: graph URI and namespace prefix maps
//! - `snapshot.rs`: the `Store` record written last by every commit

pub mod engine;
pub mod graphs;
pub mod index;
pub mod matching;
pub mod prefix;
pub mod snapshot;


pub use engine::Store;

use crate::error::Result;
use crate::storage::master::CommitPoint;

/// Graph used by `Triple::new` and `Triple::literal` when none is given
pub const DEFAULT_GRAPH_URI: &str = "urn:x-quadstore:default-graph";

/// Data type given to literals inserted without one. Matches report it as `None`.
pub const PLAIN_LITERAL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#PlainLiteral";

/// A triple in a named graph, with string terms
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    /// Object URI, or the lexical value when `is_literal`
    pub object: String,
    pub is_literal: bool,
    pub data_type: Option<String>,
    pub lang_code: Option<String>,
    pub graph: String,
}

impl Triple {
    /// Triple with a URI object in the default graph
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            is_literal: false,
            data_type: None,
            lang_code: None,
            graph: DEFAULT_GRAPH_URI.to_string(),
        }
    }

    /// Triple with a literal object in the default graph
    pub fn literal(subject: impl Into<String>, predicate: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            is_literal: true,
            ..Self::new(subject, predicate, value)
        }
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang_code = Some(lang.into());
        self
    }

    pub fn in_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = graph.into();
        self
    }
}

/// A bound object in a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPattern {
    Uri(String),
    Literal {
        value: String,
        data_type: Option<String>,
        lang: Option<String>,
    },
}

/// Subject/predicate/object bindings (None = wildcard) plus a graph filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<ObjectPattern>,
    /// None matches every graph
    pub graphs: Option<Vec<String>>,
}

impl TriplePattern {
    /// Pattern matching every triple in every graph
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn object_uri(mut self, object: impl Into<String>) -> Self {
        self.object = Some(ObjectPattern::Uri(object.into()));
        self
    }

    pub fn object_literal(mut self, value: impl Into<String>, data_type: Option<&str>, lang: Option<&str>) -> Self {
        self.object = Some(ObjectPattern::Literal {
            value: value.into(),
            data_type: data_type.map(str::to_string),
            lang: lang.map(str::to_string),
        });
        self
    }

    pub fn graphs<I, S>(mut self, graphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graphs = Some(graphs.into_iter().map(Into::into).collect());
        self
    }
}

/// A match result at the id level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdTriple {
    pub subject: u64,
    pub predicate: u64,
    pub object: u64,
    pub graph: u64,
}

/// Ordering of id-level match results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOrder {
    /// Index order of whichever index served the pattern
    #[default]
    Unordered,
    /// Ascending by (subject, predicate, object, graph) id
    Ordered,
}

/// Main trait for triple storage
pub trait TripleStore {
    // === TRIPLE OPERATIONS ===

    /// Insert a triple. Inserting it again into the same graph is a no-op.
    fn insert_triple(&mut self, triple: &Triple) -> Result<()>;

    /// Remove a triple from its graph. Unknown terms make this a no-op.
    fn delete_triple(&mut self, triple: &Triple) -> Result<()>;

    /// One result per (triple, graph) pair matching the pattern
    fn match_triples(&self, pattern: &TriplePattern) -> Result<Vec<Triple>>;

    /// Every triple, optionally restricted to some graphs
    fn match_all_triples(&self, graphs: Option<&[&str]>) -> Result<Vec<Triple>>;

    /// Id-level matches for query planners
    fn match_enumeration(&self, pattern: &TriplePattern, order: MatchOrder) -> Result<Vec<IdTriple>>;

    // === GRAPH OPERATIONS ===

    /// Insert every triple of `source` into `target`
    fn add_graph(&mut self, source: &str, target: &str) -> Result<()>;

    /// Replace the content of `target` with the content of `source`
    fn copy_graph(&mut self, source: &str, target: &str) -> Result<()>;

    /// Copy `source` into `target`, then delete `source`
    fn move_graph(&mut self, source: &str, target: &str) -> Result<()>;

    fn delete_graph(&mut self, graph: &str) -> Result<()>;

    fn delete_graphs(&mut self, graphs: &[&str]) -> Result<()>;

    /// Every graph URI known to the store
    fn graph_uris(&self) -> Vec<String>;

    // === PERSISTENCE ===

    /// Write all changes and append a commit point
    fn commit(&mut self, job_id: u128) -> Result<CommitPoint>;

    /// Write all changes without appending a commit point
    fn flush_changes(&mut self) -> Result<()>;

    /// Commit points, oldest first
    fn commit_points(&self) -> Result<Vec<CommitPoint>>;

    /// Make `point` the current state and record that as a new commit point
    fn revert_to_commit_point(&mut self, point: &CommitPoint) -> Result<()>;

    /// Rewrite live data into a fresh data file, discarding history
    fn consolidate(&mut self, job_id: u128) -> Result<CommitPoint>;
}
