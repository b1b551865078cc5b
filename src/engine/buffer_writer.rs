use crate::engine::PageAddress;
use crate::utils::BufferSlice;

/// Sequential writer over one buffer region; counterpart of
/// [`BufferReader`](super::BufferReader).
pub(crate) struct BufferWriter<'a> {
    slice: &'a mut BufferSlice,
    position: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn single(slice: &'a mut BufferSlice) -> Self {
        BufferWriter { slice, position: 0 }
    }

    pub fn skip(&mut self, bytes: usize) {
        self.position += bytes;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn write(&mut self, data: &[u8]) {
        self.slice.write_bytes(self.position, data);
        self.position += data.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write(bytes);
    }

    pub fn write_cstring(&mut self, value: &str) {
        debug_assert!(!value.as_bytes().contains(&0), "no null byte in cstring");
        self.write(value.as_bytes());
        self.write_u8(0);
    }

    pub fn write_page_address(&mut self, address: PageAddress) {
        self.write_u32(address.page_id());
        self.write_u8(address.index());
    }
}
