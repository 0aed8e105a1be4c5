//! Nodal Graph: identity-mapped, transaction-isolated client for Neo4j.
//!
//! Every node and relationship read through this crate is represented by
//! one shared [`Entity`] wrapper per identity. Reads and writes go through a
//! [`SessionTx`]; uncommitted changes are visible only to the transaction
//! that made them and are folded into the shared wrapper on commit.

pub mod cache;
pub mod capabilities;
pub mod client;
pub mod database;
pub mod entity;
pub mod error;
pub mod index;
pub mod query;
pub mod querylog;
pub mod session;
pub mod tx;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, CacheSummary, EntityCache, GraphCaches};
pub use capabilities::{Capabilities, Feature};
pub use client::BoltDriver;
pub use database::{GraphDatabase, OwnedNode};
pub use entity::{Direction, Entity};
pub use error::{GraphError, Result};
pub use index::{IndexReport, IndexSpec, IndexState, LiveIndex};
pub use query::{CypherQuery, FixedQuery, QueryBuilder, QueryContext, SortSpec};
pub use session::{Driver, Field, Param, Record, RemoteError, RemoteSession, Statement};
pub use tx::{SessionTx, StatementOutcome};
