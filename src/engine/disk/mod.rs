mod disk_service;
mod memory_cache;

pub(crate) use disk_service::*;
pub(crate) use memory_cache::*;
