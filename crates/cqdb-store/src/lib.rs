//! Cluster files, the segment registry and the database layer.
//!
//! A database is a directory of cluster files plus a registry blob. Each
//! cluster file starts with the *back index* (the forward index of the
//! preceding cluster, or an empty header for the first cluster), followed by
//! the data body; the cluster's own forward index lives at the head of the
//! *next* cluster's file and is rewritten on flush and close:
//!
//! ```text
//! [ cluster 0 ]      [ cluster 1 ]      [ cluster 2 ]
//! [ I- ][ D0 ]       [ I0 ][ D1 ]       [ I1 ][ D2 ]       [ I2 ]
//! ```
//!
//! `I-` is the empty header for the nonexistent cluster -1; `In` indexes the
//! data body `Dn` and doubles as cluster n+1's back index.

mod database;
mod header;
mod object;
mod registry;

pub use database::{Database, DbOptions};
pub use header::{Header, HEADER_MAGIC, HEADER_VERSION};
pub use object::{read_hash, write_hash, Object, StoredObject};
pub use registry::{Registry, REGISTRY_FILE};

pub use cqdb_error::{CqError, Result};
