mod buffer_reader;
mod buffer_writer;
mod collection_index;
mod collection_service;
mod constants;
mod data_block;
mod data_service;
mod disk;
mod engine;
mod engine_pragmas;
mod index_node;
mod index_service;
mod lock_service;
mod page_address;
mod page_buffer;
mod page_position;
mod pages;
mod rebuild;
mod snapshot;
mod transaction_monitor;
mod transaction_pages;
mod transaction_service;
mod vector_index_service;
mod vector_node;
mod wal_index_service;

pub(crate) use super::Result;
pub(crate) use constants::*;
pub(crate) use page_buffer::*;
pub(crate) use page_position::*;
pub(crate) use pages::*;

pub use collection_index::VectorDistanceMetric;
pub use engine::*;
pub use engine_pragmas::Pragma;
pub use page_address::PageAddress;
pub use rebuild::RebuildOptions;

use futures::{AsyncRead, AsyncSeek, AsyncWrite};
use std::pin::Pin;

pub(crate) type PageBufferArray = [u8; PAGE_SIZE];

/// One byte stream of a database (DATA or LOG).
pub trait FileStream: AsyncRead + AsyncWrite + AsyncSeek + Unpin + Send {
    fn set_len(&self, len: u64) -> Pin<Box<dyn Future<Output = Result<()>> + '_>>;
}

/// Creates and inspects the streams of one file. The engine takes one
/// factory per origin (data, log) plus the rebuild target.
#[allow(clippy::len_without_is_empty)]
pub trait StreamFactory: 'static {
    #[allow(clippy::type_complexity)]
    fn get_stream(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn FileStream>>> + '_>>;
    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + '_>>;
    fn len(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + '_>>;
    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + '_>>;
    /// Renames this file to `suffix`-appended name, keeping the content
    /// (rebuild backup). In-memory factories may simply drop the data.
    fn rename_with_suffix(&self, suffix: &str)
    -> Pin<Box<dyn Future<Output = Result<()>> + '_>>;
}
