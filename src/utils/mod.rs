mod buffer_slice;
mod case_insensitive_string;
mod collation;
mod order;
mod shared;
mod str_ext;

pub(crate) use buffer_slice::*;
pub(crate) use case_insensitive_string::*;
pub use collation::{Collation, CompareOptions};
pub use order::Order;
pub(crate) use shared::*;
pub(crate) use str_ext::*;
