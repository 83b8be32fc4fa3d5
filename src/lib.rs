//! quadstore - embeddable RDF triple store on an append-only persistent B-tree
//!
//! # Architecture
//!
//! - **Append-only data file**: data.bin holds every version of every node
//! - **Commit points**: master.bin lists the `Store` record of each commit
//! - **Resource ids**: BLAKE3(term) hash plus a collision slot
//! - **Predicate indexes**: predicate -> anchor -> related resources + graphs,
//!   one keyed by subject and one keyed by object
//! - **Consolidation**: rewrites live objects into a fresh data file
//!
//! # Usage example
//!
//! ```no_run
//! use quadstore::{StoreManager, Triple, TriplePattern, TripleStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = StoreManager::default();
//! let mut store = manager.create_store("./people.qs")?;
//!
//! store.insert_triple(
//!     &Triple::new(
//!         "http://example.org/alice",
//!         "http://xmlns.com/foaf/0.1/knows",
//!         "http://example.org/bob",
//!     )
//!     .in_graph("http://example.org/graphs/social"),
//! )?;
//! store.insert_triple(
//!     &Triple::literal("http://example.org/alice", "http://xmlns.com/foaf/0.1/name", "Alice")
//!         .with_lang("en"),
//! )?;
//! store.commit(1)?;
//!
//! let pattern = TriplePattern::any().subject("http://example.org/alice");
//! for triple in store.match_triples(&pattern)? {
//!     println!("{} {} {} ({})", triple.subject, triple.predicate, triple.object, triple.graph);
//! }
//! # Ok(())
//! # }
//! ```

pub mod btree;
pub mod config;
pub mod error;
pub mod manager;
pub mod resource;
pub mod storage;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use manager::{StoreManager, StoreMetadata};
pub use storage::CommitPoint;
pub use store::{
    IdTriple, MatchOrder, ObjectPattern, Store, Triple, TriplePattern, TripleStore, DEFAULT_GRAPH_URI,
    PLAIN_LITERAL,
};
