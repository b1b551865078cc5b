/*!
 *! # loam-db
 *!
 *! An embedded, single-file BSON document database engine: paged storage
 *! with a write-ahead log, a bounded in-memory page cache, MVCC
 *! multi-reader / single-writer transactions, skiplist ordered indexes and
 *! an HNSW-style vector similarity index.
 *!
 *! The engine is single-threaded async: services never block the executor
 *! except at I/O and lock boundaries. Lock timeouts use tokio timers, so
 *! engine operations must run inside a tokio runtime.
 */

#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod bson;
pub mod engine;
mod error;
mod memory_stream;
mod open_options;
mod utils;

#[cfg(feature = "tokio-fs")]
mod file_stream;

pub use engine::{
    BsonAutoId, Engine, EngineSettings, Pragma, Query, RebuildOptions, Transaction,
    VectorDistanceMetric,
};
pub use error::{Error, ErrorKind};
#[cfg(feature = "tokio-fs")]
pub use file_stream::FileStreamFactory;
pub use memory_stream::MemoryStreamFactory;
pub use open_options::OpenOptions;
pub use utils::{Collation, CompareOptions, Order};

pub type Result<T> = std::result::Result<T, Error>;
