use crate::Result;
use crate::engine::PageAddress;
use crate::utils::BufferSlice;

/// Sequential reader over one buffer region (header and collection
/// catalogs; documents go through `bson::Document::from_bytes`).
pub(crate) struct BufferReader<'a> {
    slice: &'a BufferSlice,
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn single(slice: &'a BufferSlice) -> Self {
        BufferReader { slice, position: 0 }
    }

    pub fn skip(&mut self, bytes: usize) {
        self.position += bytes;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn read<T, const S: usize>(&mut self, f: impl Fn([u8; S]) -> T) -> T {
        let bytes = self.slice.read_bytes(self.position, S);
        self.position += S;
        f(bytes.try_into().unwrap())
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read(u8::from_le_bytes)
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> u64 {
        self.read(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> i64 {
        self.read(i64::from_le_bytes)
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_bytes(&mut self, length: usize) -> &'a [u8] {
        let bytes = self.slice.read_bytes(self.position, length);
        self.position += length;
        bytes
    }

    pub fn read_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8();
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        Ok(String::from_utf8(bytes)?)
    }

    pub fn read_page_address(&mut self) -> PageAddress {
        let page_id = self.read_u32();
        let index = self.read_u8();
        PageAddress::new(page_id, index)
    }

    /// Reads one embedded document (its length prefix decides how far).
    pub fn read_document(&mut self) -> Result<crate::bson::Document> {
        let length = self.slice.read_i32(self.position);
        if length < 5 || self.position + length as usize > self.slice.len() {
            return Err(crate::Error::invalid_bson());
        }
        let bytes = self.read_bytes(length as usize);
        crate::bson::Document::from_bytes(bytes)
    }
}
