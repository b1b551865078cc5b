use crate::engine::{PAGE_HEADER_SIZE, PAGE_SIZE, PageBuffer};
use crate::utils::BufferSlice;
use crate::{Error, Result};
use std::cmp::Ordering;

// page header layout (little-endian)
const P_PAGE_ID: usize = 0; // 00-03 [u32]
const P_PAGE_TYPE: usize = 4; // 04-04 [u8]
const P_PREV_PAGE_ID: usize = 5; // 05-08 [u32]
const P_NEXT_PAGE_ID: usize = 9; // 09-12 [u32]
const P_ITEMS_COUNT: usize = 13; // 13-13 [u8]
const P_USED_BYTES: usize = 14; // 14-15 [u16]
const P_FRAGMENTED_BYTES: usize = 16; // 16-17 [u16]
const P_NEXT_FREE_POSITION: usize = 18; // 18-19 [u16]
const P_HIGHEST_INDEX: usize = 20; // 20-20 [u8]
const P_COL_ID: usize = 21; // 21-24 [u32]
const P_TRANSACTION_ID: usize = 25; // 25-28 [u32]
const P_IS_CONFIRMED: usize = 29; // 29-29 [u8]
const P_PAGE_LIST_SLOT: usize = 30; // 30-30 [u8]
// 31 reserved

const SLOT_SIZE: usize = 4;

/// The slotted page every page type wraps: fixed header, segments growing
/// down from the header, slot directory (position, length pairs) growing
/// up from the page tail.
pub(crate) struct BasePage {
    buffer: Box<PageBuffer>,

    page_id: u32,
    page_type: PageType,
    prev_page_id: u32,
    next_page_id: u32,
    page_list_slot: u8,

    transaction_id: u32,
    is_confirmed: bool,
    col_id: u32,

    items_count: u8,
    used_bytes: u16,
    fragmented_bytes: u16,
    next_free_position: u16,
    highest_index: u8,

    dirty: bool,
    // scan start for the next free slot index
    start_index: u8,
}

impl BasePage {
    pub const P_PAGE_ID: usize = P_PAGE_ID;
    pub const P_PAGE_TYPE: usize = P_PAGE_TYPE;
    pub const P_NEXT_PAGE_ID: usize = P_NEXT_PAGE_ID;
    pub const P_TRANSACTION_ID: usize = P_TRANSACTION_ID;
    pub const P_IS_CONFIRMED: usize = P_IS_CONFIRMED;
    pub const SLOT_SIZE: usize = SLOT_SIZE;

    pub fn new(buffer: Box<PageBuffer>, page_id: u32, page_type: PageType) -> Self {
        let mut base = BasePage {
            buffer,

            page_id,
            page_type,
            prev_page_id: u32::MAX,
            next_page_id: u32::MAX,
            page_list_slot: u8::MAX,

            transaction_id: u32::MAX,
            is_confirmed: false,
            col_id: u32::MAX,

            items_count: 0,
            used_bytes: 0,
            fragmented_bytes: 0,
            next_free_position: PAGE_HEADER_SIZE as u16,
            highest_index: u8::MAX,

            dirty: false,
            start_index: 0,
        };

        base.buffer.write_u32(P_PAGE_ID, base.page_id);
        base.buffer.write_u8(P_PAGE_TYPE, page_type as u8);

        base
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let mut page = Self::new(buffer, 0, PageType::Empty);
        page.reload_fully()?;
        Ok(page)
    }

    pub(crate) fn reload_fully(&mut self) -> Result<()> {
        let buffer = self.buffer.as_ref();

        self.page_id = buffer.read_u32(P_PAGE_ID);
        self.page_type = buffer.read_u8(P_PAGE_TYPE).try_into()?;
        self.prev_page_id = buffer.read_u32(P_PREV_PAGE_ID);
        self.next_page_id = buffer.read_u32(P_NEXT_PAGE_ID);
        self.page_list_slot = buffer.read_u8(P_PAGE_LIST_SLOT);

        self.transaction_id = buffer.read_u32(P_TRANSACTION_ID);
        self.is_confirmed = buffer.read_bool(P_IS_CONFIRMED);
        self.col_id = buffer.read_u32(P_COL_ID);

        self.items_count = buffer.read_u8(P_ITEMS_COUNT);
        self.used_bytes = buffer.read_u16(P_USED_BYTES);
        self.fragmented_bytes = buffer.read_u16(P_FRAGMENTED_BYTES);
        self.next_free_position = buffer.read_u16(P_NEXT_FREE_POSITION);
        self.highest_index = buffer.read_u8(P_HIGHEST_INDEX);

        Ok(())
    }

    pub(crate) fn update_buffer(&mut self) -> &PageBuffer {
        let buffer = &mut self.buffer;

        assert_eq!(
            buffer.read_u32(P_PAGE_ID),
            self.page_id,
            "page id cannot be changed"
        );

        buffer.write_u8(P_PAGE_TYPE, self.page_type as u8);
        buffer.write_u32(P_PREV_PAGE_ID, self.prev_page_id);
        buffer.write_u32(P_NEXT_PAGE_ID, self.next_page_id);
        buffer.write_u8(P_PAGE_LIST_SLOT, self.page_list_slot);

        buffer.write_u32(P_TRANSACTION_ID, self.transaction_id);
        buffer.write_bool(P_IS_CONFIRMED, self.is_confirmed);
        buffer.write_u32(P_COL_ID, self.col_id);

        buffer.write_u8(P_ITEMS_COUNT, self.items_count);
        buffer.write_u16(P_USED_BYTES, self.used_bytes);
        buffer.write_u16(P_FRAGMENTED_BYTES, self.fragmented_bytes);
        buffer.write_u16(P_NEXT_FREE_POSITION, self.next_free_position);
        buffer.write_u8(P_HIGHEST_INDEX, self.highest_index);

        buffer
    }

    /// Turns this page into a free-chain member, wiping the content area.
    pub fn mark_as_empty(&mut self) {
        self.set_dirty();

        self.page_type = PageType::Empty;
        self.prev_page_id = u32::MAX;
        self.next_page_id = u32::MAX;
        self.page_list_slot = u8::MAX;

        self.col_id = u32::MAX;
        self.transaction_id = u32::MAX;
        self.is_confirmed = false;

        self.items_count = 0;
        self.used_bytes = 0;
        self.fragmented_bytes = 0;
        self.next_free_position = PAGE_HEADER_SIZE as u16;
        self.highest_index = u8::MAX;

        self.buffer
            .clear(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        self.buffer.write_u8(P_PAGE_TYPE, self.page_type as u8);
    }
}

// header accessors
impl BasePage {
    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn prev_page_id(&self) -> u32 {
        self.prev_page_id
    }

    pub fn set_prev_page_id(&mut self, page_id: u32) {
        self.prev_page_id = page_id;
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    pub fn set_next_page_id(&mut self, page_id: u32) {
        self.next_page_id = page_id;
    }

    pub fn page_list_slot(&self) -> u8 {
        self.page_list_slot
    }

    pub fn set_page_list_slot(&mut self, slot: u8) {
        self.page_list_slot = slot;
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn set_transaction_id(&mut self, value: u32) {
        self.transaction_id = value;
    }

    pub fn is_confirmed(&self) -> bool {
        self.is_confirmed
    }

    pub fn set_confirmed(&mut self, value: bool) {
        self.is_confirmed = value;
    }

    pub fn col_id(&self) -> u32 {
        self.col_id
    }

    pub fn set_col_id(&mut self, col_id: u32) {
        self.col_id = col_id;
    }

    pub fn items_count(&self) -> u8 {
        self.items_count
    }

    pub fn used_bytes(&self) -> u16 {
        self.used_bytes
    }

    pub fn fragmented_bytes(&self) -> u16 {
        self.fragmented_bytes
    }

    pub fn highest_index(&self) -> u8 {
        self.highest_index
    }

    pub(crate) fn buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut PageBuffer {
        &mut self.buffer
    }

    pub(crate) fn into_buffer(self) -> Box<PageBuffer> {
        self.buffer
    }

    pub(crate) fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn free_bytes(&self) -> usize {
        if self.items_count == u8::MAX {
            0
        } else {
            PAGE_SIZE - PAGE_HEADER_SIZE - self.used_bytes as usize - self.footer_size()
        }
    }

    pub(crate) fn footer_size(&self) -> usize {
        if self.highest_index == u8::MAX {
            0
        } else {
            (self.highest_index as usize + 1) * SLOT_SIZE
        }
    }
}

// segment access and manipulation
impl BasePage {
    pub fn get(&self, index: u8) -> &BufferSlice {
        assert!(self.items_count > 0, "should have items in this page");
        assert_ne!(self.highest_index, u8::MAX, "should have at least 1 index");
        assert!(index <= self.highest_index, "index beyond highest index");

        let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
        let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

        assert!(
            self.valid_position(position, length),
            "invalid position or length"
        );

        self.buffer.slice(position, length)
    }

    pub fn get_mut(&mut self, index: u8) -> &mut BufferSlice {
        assert!(self.items_count > 0, "should have items in this page");
        assert_ne!(self.highest_index, u8::MAX, "should have at least 1 index");
        assert!(index <= self.highest_index, "index beyond highest index");

        let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
        let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

        assert!(
            self.valid_position(position, length),
            "invalid position or length"
        );

        self.dirty = true;
        self.buffer.slice_mut(position, length)
    }

    /// True when `index` addresses a live segment.
    pub fn is_used(&self, index: u8) -> bool {
        if self.highest_index == u8::MAX || index > self.highest_index {
            return false;
        }
        self.buffer.read_u16(Self::calc_position_addr(index)) != 0
    }

    pub fn insert(&mut self, length: usize) -> (&mut BufferSlice, u8) {
        self.internal_insert(length, u8::MAX)
    }

    fn internal_insert(&mut self, length: usize, mut index: u8) -> (&mut BufferSlice, u8) {
        let is_new = index == u8::MAX;

        assert!(length > 0, "length should be greater than 0");
        assert!(
            self.free_bytes() >= length + (if is_new { SLOT_SIZE } else { 0 }),
            "not enough space in page {}",
            self.page_id
        );
        assert!(self.items_count < u8::MAX, "page full");
        assert!(
            self.free_bytes() >= self.fragmented_bytes as usize,
            "fragmented bytes must be at most free bytes"
        );

        let continuous = self.free_bytes()
            - self.fragmented_bytes as usize
            - (if is_new { SLOT_SIZE } else { 0 });

        debug_assert_eq!(
            continuous,
            PAGE_SIZE
                - self.next_free_position as usize
                - self.footer_size()
                - (if is_new { SLOT_SIZE } else { 0 }),
            "continuous free block must agree with next free position"
        );

        if length > continuous {
            self.defrag();
        }

        if index == u8::MAX {
            index = self.get_free_index();
        }

        if index > self.highest_index || self.highest_index == u8::MAX {
            debug_assert_eq!(
                index,
                self.highest_index.wrapping_add(1),
                "index should be highest index + 1"
            );
            self.highest_index = index;
        }

        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        debug_assert_eq!(
            self.buffer.read_u16(position_addr),
            0,
            "slot position must be empty before use"
        );
        debug_assert_eq!(
            self.buffer.read_u16(length_addr),
            0,
            "slot length must be empty before use"
        );

        let position = self.next_free_position;

        self.buffer.write_u16(position_addr, position);
        self.buffer.write_u16(length_addr, length as u16);

        self.items_count += 1;
        self.used_bytes += length as u16;
        self.next_free_position += length as u16;

        self.set_dirty();

        (self.buffer.slice_mut(position as usize, length), index)
    }

    pub fn delete(&mut self, index: u8) {
        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        let position = self.buffer.read_u16(position_addr) as usize;
        let length = self.buffer.read_u16(length_addr) as usize;

        assert!(
            self.valid_position(position, length),
            "invalid position or length"
        );

        self.buffer.write_u16(position_addr, 0);
        self.buffer.write_u16(length_addr, 0);

        self.items_count -= 1;
        self.used_bytes -= length as u16;

        self.buffer.clear(position, length);

        let is_last_segment = position + length == self.next_free_position as usize;
        if is_last_segment {
            self.next_free_position = position as u16;
        } else {
            self.fragmented_bytes += length as u16;
        }

        if index == self.highest_index {
            self.update_highest_index();
        }

        self.start_index = 0;

        if self.items_count == 0 {
            debug_assert_eq!(
                self.highest_index,
                u8::MAX,
                "with no items the highest index must be clear"
            );
            debug_assert_eq!(self.used_bytes, 0, "no bytes used in a clean page");

            self.next_free_position = PAGE_HEADER_SIZE as u16;
            self.fragmented_bytes = 0;
        }

        self.set_dirty();
    }

    pub fn update(&mut self, index: u8, length: usize) -> &mut BufferSlice {
        debug_assert!(length > 0, "length should be greater than 0");

        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        let position = self.buffer.read_u16(position_addr) as usize;
        let old_length = self.buffer.read_u16(length_addr) as usize;

        assert!(
            self.valid_position(position, old_length),
            "invalid position or length"
        );

        let is_last_segment = position + old_length == self.next_free_position as usize;
        self.set_dirty();

        match length.cmp(&old_length) {
            Ordering::Equal => self.buffer.slice_mut(position, old_length),
            Ordering::Less => {
                // shrink in place; the gap becomes fragment (or free tail)
                let diff = old_length - length;

                if is_last_segment {
                    self.next_free_position -= diff as u16;
                } else {
                    self.fragmented_bytes += diff as u16;
                }

                self.used_bytes -= diff as u16;
                self.buffer.write_u16(length_addr, length as u16);
                self.buffer.clear(position + length, diff);

                self.buffer.slice_mut(position, length)
            }
            Ordering::Greater => {
                // remove the old segment and re-insert under the same index
                self.buffer.clear(position, old_length);

                self.items_count -= 1;
                self.used_bytes -= old_length as u16;

                if is_last_segment {
                    self.next_free_position = position as u16;
                } else {
                    self.fragmented_bytes += old_length as u16;
                }

                self.buffer.write_u16(position_addr, 0);
                self.buffer.write_u16(length_addr, 0);

                self.internal_insert(length, index).0
            }
        }
    }

    /// Compacts live segments to the head of the content area, zeroing the
    /// rest.
    pub fn defrag(&mut self) {
        debug_assert!(self.fragmented_bytes > 0, "no fragmented bytes to defrag");
        debug_assert!(
            self.highest_index < u8::MAX,
            "should have at least 1 index in this page"
        );

        log::trace!(
            "defrag page {} ({} fragmented bytes)",
            self.page_id,
            self.fragmented_bytes
        );

        let mut segments = Vec::with_capacity(self.items_count as usize);
        for index in 0..=self.highest_index {
            let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
            if position != 0 {
                segments.push((position, index));
            }
        }

        segments.sort_by_key(|(position, _)| *position);

        let mut next_position = PAGE_HEADER_SIZE;
        for (position, index) in segments {
            let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

            debug_assert!(
                self.valid_position(position, length),
                "invalid position or length"
            );

            if position != next_position {
                self.buffer
                    .buffer_mut()
                    .copy_within(position..position + length, next_position);
                self.buffer
                    .write_u16(Self::calc_position_addr(index), next_position as u16);
            }

            next_position += length;
        }

        let empty_length = PAGE_SIZE - next_position - self.footer_size();
        self.buffer.clear(next_position, empty_length);

        self.fragmented_bytes = 0;
        self.next_free_position = next_position as u16;
    }

    fn get_free_index(&mut self) -> u8 {
        if self.highest_index == u8::MAX {
            self.start_index = 1;
            return 0;
        }

        for index in self.start_index..=self.highest_index {
            let position = self.buffer.read_u16(Self::calc_position_addr(index));
            if position == 0 {
                self.start_index = index + 1;
                return index;
            }
        }

        self.highest_index + 1
    }

    pub fn get_used_indices(&self) -> impl Iterator<Item = u8> {
        let highest = if self.highest_index == u8::MAX {
            None
        } else {
            Some(self.highest_index)
        };
        highest
            .into_iter()
            .flat_map(|h| 0..=h)
            .filter(move |&index| self.buffer.read_u16(Self::calc_position_addr(index)) != 0)
    }

    fn update_highest_index(&mut self) {
        self.highest_index = self.get_used_indices().max().unwrap_or(u8::MAX);
    }

    fn valid_position(&self, position: usize, length: usize) -> bool {
        (position >= PAGE_HEADER_SIZE && position < (PAGE_SIZE - self.footer_size()))
            && (length > 0 && length <= PAGE_SIZE - PAGE_HEADER_SIZE - self.footer_size())
    }
}

// static helpers
impl BasePage {
    pub fn get_page_position(page_id: u32) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    /// Slot directory lives at the page tail, newest slot lowest.
    pub fn calc_position_addr(index: u8) -> usize {
        PAGE_SIZE - ((index as usize + 1) * SLOT_SIZE) + 2
    }

    pub fn calc_length_addr(index: u8) -> usize {
        PAGE_SIZE - ((index as usize + 1) * SLOT_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Empty = 0,
    Header = 1,
    Collection = 2,
    Index = 3,
    Data = 4,
    VectorIndex = 5,
}

impl TryFrom<u8> for PageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageType::Empty),
            1 => Ok(PageType::Header),
            2 => Ok(PageType::Collection),
            3 => Ok(PageType::Index),
            4 => Ok(PageType::Data),
            5 => Ok(PageType::VectorIndex),
            _ => Err(Error::invalid_page()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_page() -> BasePage {
        BasePage::new(Box::new(PageBuffer::new()), 7, PageType::Data)
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut page = new_page();

        let (segment, index) = page.insert(16);
        segment.write_bytes(0, b"hello world 1234");
        assert_eq!(index, 0);
        assert_eq!(page.items_count(), 1);
        assert_eq!(page.used_bytes(), 16);

        assert_eq!(page.get(0).as_bytes(), b"hello world 1234");
        assert_eq!(
            page.free_bytes(),
            PAGE_SIZE - PAGE_HEADER_SIZE - 16 - SLOT_SIZE
        );
    }

    #[test]
    fn delete_reclaims_tail_and_fragments_middle() {
        let mut page = new_page();
        let (_, a) = page.insert(100);
        let (_, b) = page.insert(200);
        let (_, c) = page.insert(50);

        // middle delete fragments
        page.delete(b);
        assert_eq!(page.fragmented_bytes(), 200);

        // tail delete shrinks the free position instead
        page.delete(c);
        assert_eq!(page.fragmented_bytes(), 200);
        assert_eq!(page.items_count(), 1);

        page.delete(a);
        assert_eq!(page.items_count(), 0);
        assert_eq!(page.fragmented_bytes(), 0);
        assert_eq!(page.free_bytes(), PAGE_SIZE - PAGE_HEADER_SIZE);
    }

    #[test]
    fn defrag_makes_room_again() {
        let mut page = new_page();
        let big = (PAGE_SIZE - PAGE_HEADER_SIZE) / 2 - 2 * SLOT_SIZE;
        let (_, a) = page.insert(big);
        let (_, _b) = page.insert(100);
        page.delete(a);

        // there is enough free space only after compaction
        let (segment, _) = page.insert(big - 100);
        assert!(segment.len() == big - 100);
        assert_eq!(page.fragmented_bytes(), 0);
    }

    #[test]
    fn update_grow_and_shrink() {
        let mut page = new_page();
        let (segment, index) = page.insert(8);
        segment.write_bytes(0, b"01234567");

        let segment = page.update(index, 4);
        assert_eq!(segment.len(), 4);

        let segment = page.update(index, 64);
        assert_eq!(segment.len(), 64);
        assert_eq!(page.items_count(), 1);
    }

    #[test]
    fn slot_indexes_are_reused() {
        let mut page = new_page();
        let (_, a) = page.insert(10);
        let (_, b) = page.insert(10);
        page.delete(a);

        let (_, again) = page.insert(12);
        assert_eq!(again, a);
        assert!(page.is_used(b));
    }

    #[test]
    fn mark_as_empty_clears_everything() {
        let mut page = new_page();
        page.insert(32).0.write_bytes(0, &[1; 32]);
        page.mark_as_empty();

        assert_eq!(page.page_type(), PageType::Empty);
        assert_eq!(page.items_count(), 0);
        assert_eq!(page.free_bytes(), PAGE_SIZE - PAGE_HEADER_SIZE);
        assert_eq!(page.page_id(), 7);
    }

    #[test]
    fn header_fields_roundtrip_through_buffer() {
        let mut page = new_page();
        page.set_col_id(3);
        page.set_transaction_id(9);
        page.set_confirmed(true);
        page.set_next_page_id(11);
        page.update_buffer();

        let buffer = page.into_buffer();
        let reloaded = BasePage::load(buffer).unwrap();
        assert_eq!(reloaded.col_id(), 3);
        assert_eq!(reloaded.transaction_id(), 9);
        assert!(reloaded.is_confirmed());
        assert_eq!(reloaded.next_page_id(), 11);
        assert_eq!(reloaded.page_type(), PageType::Data);
    }
}
