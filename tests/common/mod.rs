#![allow(dead_code)]

use loam_db::engine::{Engine, EngineSettings};
use loam_db::{MemoryStreamFactory, OpenOptions};
use std::sync::{Arc, Mutex};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A throwaway in-memory engine.
pub async fn memory_engine() -> Engine {
    init_logs();
    OpenOptions::new(":memory:").open().await.unwrap()
}

pub type SharedFile = Arc<Mutex<Vec<u8>>>;

pub fn shared_file() -> SharedFile {
    Arc::new(Mutex::new(Vec::new()))
}

/// Settings over shared in-memory buffers, so tests can reopen the same
/// "files" and inspect or corrupt their bytes.
pub fn shared_settings(data: &SharedFile, log: &SharedFile, auto_rebuild: bool) -> EngineSettings {
    EngineSettings {
        data_factory: Box::new(MemoryStreamFactory::with_data(data.clone())),
        log_factory: Box::new(MemoryStreamFactory::with_data(log.clone())),
        collation: None,
        initial_size: 0,
        read_only: false,
        auto_rebuild,
    }
}

pub async fn shared_engine(data: &SharedFile, log: &SharedFile) -> Engine {
    init_logs();
    Engine::open(shared_settings(data, log, false)).await.unwrap()
}
