use crate::engine::PageBuffer;
use crate::utils::{Collation, CompareOptions};
use crate::{Error, Result};
use std::time::Duration;

// persisted inside the header page
const P_USER_VERSION: usize = 80; // 80-83 [i32]
const P_COLLATION_LCID: usize = 84; // 84-87 [i32]
const P_COLLATION_SORT: usize = 88; // 88-91 [i32]
const P_TIMEOUT: usize = 92; // 92-95 [i32] seconds
const P_UTC_DATE: usize = 96; // 96-96 [u8]
const P_AUTO_REBUILD: usize = 97; // 97-97 [u8]
const P_CHECKPOINT: usize = 100; // 100-103 [u32] pages
const P_LIMIT_SIZE: usize = 104; // 104-111 [i64] bytes

/// Engine pragmas, persisted in the header page.
#[derive(Debug, Clone)]
pub(crate) struct EnginePragmas {
    pub user_version: i32,
    pub collation: Collation,
    pub timeout: Duration,
    pub limit_size: i64,
    pub utc_date: bool,
    /// LOG page count that triggers an automatic checkpoint; 0 disables.
    pub checkpoint: u32,
    pub auto_rebuild: bool,
}

impl Default for EnginePragmas {
    fn default() -> Self {
        EnginePragmas {
            user_version: 0,
            collation: Collation::default(),
            timeout: Duration::from_secs(60),
            limit_size: i64::MAX,
            utc_date: false,
            checkpoint: 1000,
            auto_rebuild: false,
        }
    }
}

impl EnginePragmas {
    pub fn read(buffer: &PageBuffer) -> Result<Self> {
        let limit_size = buffer.read_i64(P_LIMIT_SIZE);

        Ok(EnginePragmas {
            user_version: buffer.read_i32(P_USER_VERSION),
            collation: Collation::new(
                buffer.read_i32(P_COLLATION_LCID),
                CompareOptions(buffer.read_i32(P_COLLATION_SORT)),
            ),
            timeout: Duration::from_secs(buffer.read_i32(P_TIMEOUT).max(1) as u64),
            limit_size: if limit_size == 0 { i64::MAX } else { limit_size },
            utc_date: buffer.read_bool(P_UTC_DATE),
            checkpoint: buffer.read_u32(P_CHECKPOINT),
            auto_rebuild: buffer.read_bool(P_AUTO_REBUILD),
        })
    }

    pub fn update_buffer(&self, buffer: &mut PageBuffer) {
        buffer.write_i32(P_USER_VERSION, self.user_version);
        buffer.write_i32(P_COLLATION_LCID, self.collation.lcid());
        buffer.write_i32(P_COLLATION_SORT, self.collation.sort_options().0);
        buffer.write_i32(P_TIMEOUT, self.timeout.as_secs() as i32);
        buffer.write_bool(P_UTC_DATE, self.utc_date);
        buffer.write_bool(P_AUTO_REBUILD, self.auto_rebuild);
        buffer.write_u32(P_CHECKPOINT, self.checkpoint);
        buffer.write_i64(P_LIMIT_SIZE, self.limit_size);
    }
}

/// Public pragma surface: names and values exchanged with callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Pragma {
    UserVersion(u32),
    Collation(Collation),
    CheckpointSize(u32),
    Timeout(Duration),
    LimitSize(u64),
    UtcDate(bool),
    AutoRebuild(bool),
}

impl EnginePragmas {
    pub fn get(&self, name: &str) -> Result<Pragma> {
        match name {
            "USER_VERSION" => Ok(Pragma::UserVersion(self.user_version as u32)),
            "COLLATION" => Ok(Pragma::Collation(self.collation)),
            "CHECKPOINT_SIZE" => Ok(Pragma::CheckpointSize(self.checkpoint)),
            "TIMEOUT" => Ok(Pragma::Timeout(self.timeout)),
            "LIMIT_SIZE" => Ok(Pragma::LimitSize(self.limit_size as u64)),
            "UTC_DATE" => Ok(Pragma::UtcDate(self.utc_date)),
            "AUTO_REBUILD" => Ok(Pragma::AutoRebuild(self.auto_rebuild)),
            _ => Err(Error::unsupported("unknown pragma")),
        }
    }

    /// Applies one pragma change. Collation is read-only here (it changes
    /// only through rebuild).
    pub fn set(&mut self, pragma: Pragma) -> Result<()> {
        match pragma {
            Pragma::UserVersion(v) => self.user_version = v as i32,
            Pragma::CheckpointSize(v) => self.checkpoint = v,
            Pragma::Timeout(v) => {
                if v.is_zero() {
                    return Err(Error::unsupported("zero TIMEOUT"));
                }
                self.timeout = v;
            }
            Pragma::LimitSize(v) => {
                if v < 4 * crate::engine::PAGE_SIZE as u64 {
                    return Err(Error::size_limit_reached());
                }
                self.limit_size = v as i64;
            }
            Pragma::UtcDate(v) => self.utc_date = v,
            Pragma::AutoRebuild(v) => self.auto_rebuild = v,
            Pragma::Collation(_) => return Err(Error::unsupported("COLLATION is set by rebuild")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragmas_roundtrip_through_buffer() {
        let mut buffer = PageBuffer::new();
        let mut pragmas = EnginePragmas::default();
        pragmas.user_version = 7;
        pragmas.checkpoint = 0;
        pragmas.auto_rebuild = true;
        pragmas.limit_size = 1 << 30;
        pragmas.update_buffer(&mut buffer);

        let loaded = EnginePragmas::read(&buffer).unwrap();
        assert_eq!(loaded.user_version, 7);
        assert_eq!(loaded.checkpoint, 0);
        assert!(loaded.auto_rebuild);
        assert_eq!(loaded.limit_size, 1 << 30);
        assert_eq!(loaded.collation, Collation::default());
    }
}
