use crate::bson;
use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;
use crate::engine::engine_pragmas::EnginePragmas;
use crate::engine::pages::base_page::{BasePage, PageType};
use crate::engine::PageBuffer;
use crate::{Error, Result};

const HEADER_INFO: &[u8] = b"** This is a loam-db file **";
const FILE_VERSION: u8 = 1;

const P_HEADER_INFO: usize = 32; // 32-59 (28 bytes)
const P_FILE_VERSION: usize = 60; // 60-60 [u8]
const P_FREE_EMPTY_PAGE_ID: usize = 61; // 61-64 [u32]
const P_LAST_PAGE_ID: usize = 65; // 65-68 [u32]
const P_CREATION_TIME: usize = 69; // 69-76 [u64] ticks
// 80-111: pragmas (see engine_pragmas.rs)
const P_INVALID_DATAFILE_STATE: usize = 191; // 191-191 [u8]

const P_COLLECTIONS: usize = 192; // 192-8191
const COLLECTIONS_SIZE: usize = 8000;

/// Page 0: database identity, pragmas, the free-empty-page chain head and
/// the collection directory (name → collection page id).
pub(crate) struct HeaderPage {
    base: BasePage,

    creation_time: bson::DateTime,
    pragmas: EnginePragmas,
    collections: bson::Document,
    last_page_id: u32,
    free_empty_page_list: u32,

    collections_changed: bool,
}

impl HeaderPage {
    pub const P_INVALID_DATAFILE_STATE: usize = P_INVALID_DATAFILE_STATE;

    pub fn new(buffer: Box<PageBuffer>) -> Self {
        let creation_time = bson::DateTime::now().truncate_to_milliseconds();
        let mut header = HeaderPage {
            base: BasePage::new(buffer, 0, PageType::Header),
            creation_time,
            pragmas: EnginePragmas::default(),
            collections: bson::Document::new(),
            last_page_id: 0,
            free_empty_page_list: u32::MAX,
            // force the (empty) directory document into the buffer so a
            // freshly bootstrapped file parses on the next open
            collections_changed: true,
        };

        let buffer = header.base.buffer_mut();
        buffer.write_bytes(P_HEADER_INFO, HEADER_INFO);
        buffer.write_u8(P_FILE_VERSION, FILE_VERSION);
        buffer.write_u64(P_CREATION_TIME, creation_time.ticks());
        header.update_buffer();

        header
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let mut header = HeaderPage {
            base: BasePage::load(buffer)?,
            creation_time: bson::DateTime::now(),
            pragmas: EnginePragmas::default(),
            collections: bson::Document::new(),
            last_page_id: 0,
            free_empty_page_list: u32::MAX,
            collections_changed: false,
        };
        header.load_content()?;
        Ok(header)
    }

    /// Re-parses everything from the raw buffer (used after WAL restore
    /// replaces the buffer content).
    pub fn reload_fully(&mut self) -> Result<()> {
        self.base.reload_fully()?;
        self.load_content()
    }

    fn load_content(&mut self) -> Result<()> {
        let buffer = self.base.buffer();

        if self.base.page_type() != PageType::Header
            || buffer.read_bytes(P_HEADER_INFO, HEADER_INFO.len()) != HEADER_INFO
            || buffer.read_u8(P_FILE_VERSION) != FILE_VERSION
        {
            return Err(Error::invalid_database());
        }

        self.creation_time = bson::DateTime::from_ticks(buffer.read_u64(P_CREATION_TIME))?;
        self.free_empty_page_list = buffer.read_u32(P_FREE_EMPTY_PAGE_ID);
        self.last_page_id = buffer.read_u32(P_LAST_PAGE_ID);
        self.pragmas = EnginePragmas::read(buffer)?;

        let area = buffer.slice(P_COLLECTIONS, COLLECTIONS_SIZE);
        let mut reader = BufferReader::single(area);
        self.collections = reader.read_document()?;
        self.collections_changed = false;

        Ok(())
    }

    pub fn update_buffer(&mut self) -> &PageBuffer {
        let collections = if self.collections_changed {
            Some(self.collections.to_vec().expect("collection directory fits"))
        } else {
            None
        };
        self.collections_changed = false;

        let buffer = self.base.buffer_mut();
        buffer.write_u32(P_FREE_EMPTY_PAGE_ID, self.free_empty_page_list);
        buffer.write_u32(P_LAST_PAGE_ID, self.last_page_id);
        self.pragmas.update_buffer(buffer);

        if let Some(bytes) = collections {
            let area = buffer.slice_mut(P_COLLECTIONS, COLLECTIONS_SIZE);
            area.clear(0, COLLECTIONS_SIZE);
            let mut writer = BufferWriter::single(area);
            writer.write_bytes(&bytes);
        }

        self.base.update_buffer()
    }

    /// Copies the current serialized state into `target` (the LOG copy
    /// written as the last page of a committing batch).
    pub fn copy_buffer_into(&mut self, target: &mut PageBuffer) {
        let source = self.update_buffer();
        *target.buffer_mut() = *source.buffer();
    }

    /// Byte snapshot for rollback of header mutations.
    pub fn save_point(&mut self) -> Box<PageBuffer> {
        let mut snapshot = Box::new(PageBuffer::new());
        self.copy_buffer_into(&mut snapshot);
        snapshot
    }

    pub fn into_buffer(self) -> Box<PageBuffer> {
        self.base.into_buffer()
    }

    pub fn restore(&mut self, save_point: &PageBuffer) {
        *self.base.buffer_mut().buffer_mut() = *save_point.buffer();
        // the snapshot was produced by update_buffer, so it must parse
        self.reload_fully().expect("failed to restore header savepoint");
    }
}

impl HeaderPage {
    pub fn base(&self) -> &BasePage {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BasePage {
        &mut self.base
    }

    pub fn pragmas(&self) -> &EnginePragmas {
        &self.pragmas
    }

    pub fn pragmas_mut(&mut self) -> &mut EnginePragmas {
        &mut self.pragmas
    }

    pub fn creation_time(&self) -> bson::DateTime {
        self.creation_time
    }

    pub fn free_empty_page_list(&self) -> u32 {
        self.free_empty_page_list
    }

    pub fn set_free_empty_page_list(&mut self, page_id: u32) {
        self.free_empty_page_list = page_id;
    }

    pub fn last_page_id(&self) -> u32 {
        self.last_page_id
    }

    pub fn set_last_page_id(&mut self, page_id: u32) {
        self.last_page_id = page_id;
    }

    pub fn invalid_datafile_state(&self) -> bool {
        self.base.buffer().read_bool(P_INVALID_DATAFILE_STATE)
    }

    pub fn set_invalid_datafile_state(&mut self, value: bool) {
        self.base
            .buffer_mut()
            .write_bool(P_INVALID_DATAFILE_STATE, value);
    }

    pub fn get_collection_page_id(&self, collection: &str) -> u32 {
        self.collections
            .try_get(collection)
            .and_then(|v| v.as_i32())
            .map(|v| v as u32)
            .unwrap_or(u32::MAX)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().map(str::to_string).collect()
    }

    pub fn insert_collection(&mut self, collection: &str, page_id: u32) {
        self.collections.insert(collection, page_id as i32);
        self.collections_changed = true;
    }

    pub fn delete_collection(&mut self, collection: &str) {
        self.collections.remove(collection);
        self.collections_changed = true;
    }

    pub fn rename_collection(&mut self, old_name: &str, new_name: &str) {
        if let Some(page_id) = self.collections.remove(old_name) {
            self.collections.insert(new_name, page_id);
        }
        self.collections_changed = true;
    }

    /// Room left in the directory area for one more collection entry.
    pub fn get_available_collection_space(&self) -> usize {
        COLLECTIONS_SIZE
            .saturating_sub(self.collections.serialized_len())
            .saturating_sub(1 + 1 + 4 + 8) // tag, terminator, page id, slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_roundtrips() {
        let mut header = HeaderPage::new(Box::new(PageBuffer::new()));
        header.insert_collection("customers", 4);
        header.set_last_page_id(9);
        header.set_free_empty_page_list(5);
        header.update_buffer();

        let buffer = {
            let mut copy = Box::new(PageBuffer::new());
            *copy.buffer_mut() = *header.update_buffer().buffer();
            copy
        };
        let loaded = HeaderPage::load(buffer).unwrap();
        assert_eq!(loaded.get_collection_page_id("customers"), 4);
        assert_eq!(loaded.get_collection_page_id("missing"), u32::MAX);
        assert_eq!(loaded.last_page_id(), 9);
        assert_eq!(loaded.free_empty_page_list(), 5);
    }

    #[test]
    fn save_point_restores_mutations() {
        let mut header = HeaderPage::new(Box::new(PageBuffer::new()));
        header.insert_collection("a", 1);
        let save_point = header.save_point();

        header.insert_collection("b", 2);
        header.set_last_page_id(42);
        header.restore(&save_point);

        assert_eq!(header.get_collection_page_id("a"), 1);
        assert_eq!(header.get_collection_page_id("b"), u32::MAX);
        assert_eq!(header.last_page_id(), 0);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut buffer = Box::new(PageBuffer::new());
        buffer.buffer_mut()[..64].fill(0xCC);
        assert!(HeaderPage::load(buffer).is_err());
    }
}
