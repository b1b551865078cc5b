use crate::bson;
use crate::engine::PageAddress;
use crate::utils::{BufferSlice, Order};
use crate::{Error, Result};

// segment layout of one skiplist node
const P_SLOT: usize = 0; // 00-00 [u8]
const P_LEVELS: usize = 1; // 01-01 [u8]
const P_DATA_BLOCK: usize = 2; // 02-06 [PageAddress]
const P_NEXT_NODE: usize = 7; // 07-11 [PageAddress]
const P_PREV_NEXT: usize = 12; // 12-.. (prev, next) × levels
pub(crate) const INDEX_NODE_FIXED_SIZE: usize =
    1 + 1 + PageAddress::SERIALIZED_SIZE + PageAddress::SERIALIZED_SIZE;

pub(crate) fn calc_key_offset(levels: u8) -> usize {
    P_PREV_NEXT + levels as usize * PageAddress::SERIALIZED_SIZE * 2
}

pub(crate) fn calc_prev_offset(level: u8) -> usize {
    P_PREV_NEXT + level as usize * PageAddress::SERIALIZED_SIZE * 2
}

pub(crate) fn calc_next_offset(level: u8) -> usize {
    calc_prev_offset(level) + PageAddress::SERIALIZED_SIZE
}

/// Owned view of one skiplist node. Loaded (copied) out of a page
/// segment; mutations go back through `IndexPage` setters so the page
/// dirty flag stays accurate.
#[derive(Debug, Clone)]
pub(crate) struct IndexNode {
    position: PageAddress,
    slot: u8,
    levels: u8,
    key: bson::Value,
    data_block: PageAddress,
    next_node: PageAddress,
    prev: Vec<PageAddress>,
    next: Vec<PageAddress>,
}

impl IndexNode {
    pub const P_SLOT: usize = P_SLOT;
    pub const P_LEVELS: usize = P_LEVELS;
    pub const P_DATA_BLOCK: usize = P_DATA_BLOCK;
    pub const P_NEXT_NODE: usize = P_NEXT_NODE;

    pub fn load(page_id: u32, index: u8, segment: &BufferSlice) -> Result<Self> {
        let slot = segment.read_u8(P_SLOT);
        let levels = segment.read_u8(P_LEVELS);
        if levels == 0 || levels as usize > crate::engine::MAX_LEVEL_LENGTH as usize {
            return Err(Error::invalid_page());
        }

        let data_block = segment.read_page_address(P_DATA_BLOCK);
        let next_node = segment.read_page_address(P_NEXT_NODE);

        let mut prev = Vec::with_capacity(levels as usize);
        let mut next = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            prev.push(segment.read_page_address(calc_prev_offset(level)));
            next.push(segment.read_page_address(calc_next_offset(level)));
        }

        let key = read_index_key(segment, calc_key_offset(levels))?;

        Ok(IndexNode {
            position: PageAddress::new(page_id, index),
            slot,
            levels,
            key,
            data_block,
            next_node,
            prev,
            next,
        })
    }

    pub fn position(&self) -> PageAddress {
        self.position
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn key(&self) -> &bson::Value {
        &self.key
    }

    pub fn into_key(self) -> bson::Value {
        self.key
    }

    pub fn data_block(&self) -> PageAddress {
        self.data_block
    }

    pub fn next_node(&self) -> PageAddress {
        self.next_node
    }

    pub fn get_prev(&self, level: u8) -> PageAddress {
        self.prev[level as usize]
    }

    pub fn get_next(&self, level: u8) -> PageAddress {
        self.next[level as usize]
    }

    pub fn get_next_prev(&self, level: u8, order: Order) -> PageAddress {
        match order {
            Order::Ascending => self.next[level as usize],
            Order::Descending => self.prev[level as usize],
        }
    }

    /// Total segment length for a node of `levels` height with `key`.
    pub fn get_node_length(levels: u8, key: &bson::Value) -> Result<usize> {
        Ok(INDEX_NODE_FIXED_SIZE
            + levels as usize * PageAddress::SERIALIZED_SIZE * 2
            + index_key_length(key)?)
    }
}

/// Serialized length of an ordered-index key: one type byte plus the
/// payload (strings and binaries carry a u16 length prefix).
pub(crate) fn index_key_length(key: &bson::Value) -> Result<usize> {
    use bson::Value;
    let payload = match key {
        Value::MinValue | Value::MaxValue | Value::Null => 0,
        Value::Int32(_) => 4,
        Value::Int64(_) | Value::Double(_) | Value::DateTime(_) => 8,
        Value::Decimal(_) => 16,
        Value::String(s) => 2 + s.len(),
        Value::Binary(b) => 2 + b.len(),
        Value::ObjectId(_) => 12,
        Value::Guid(_) => 16,
        Value::Boolean(_) => 1,
        Value::Document(_) | Value::Array(_) | Value::Vector(_) => {
            return Err(Error::new(
                crate::ErrorKind::IndexKeyTooLong,
                "documents, arrays and vectors cannot be ordered-index keys",
            ));
        }
    };
    Ok(1 + payload)
}

pub(crate) fn write_index_key(segment: &mut BufferSlice, offset: usize, key: &bson::Value) {
    use bson::Value;

    segment.write_u8(offset, key.ty() as u8);
    let offset = offset + 1;

    match key {
        Value::MinValue | Value::MaxValue | Value::Null => {}
        Value::Int32(v) => segment.write_i32(offset, *v),
        Value::Int64(v) => segment.write_i64(offset, *v),
        Value::Double(v) => segment.write_f64(offset, *v),
        Value::DateTime(v) => segment.write_i64(offset, v.as_unix_milliseconds()),
        Value::Decimal(v) => segment.write_bytes(offset, v.bytes()),
        Value::String(v) => {
            segment.write_u16(offset, v.len() as u16);
            segment.write_bytes(offset + 2, v.as_bytes());
        }
        Value::Binary(v) => {
            segment.write_u16(offset, v.len() as u16);
            segment.write_bytes(offset + 2, v.bytes());
        }
        Value::ObjectId(v) => segment.write_bytes(offset, v.as_bytes()),
        Value::Guid(v) => segment.write_bytes(offset, v.as_bytes()),
        Value::Boolean(v) => segment.write_bool(offset, *v),
        Value::Document(_) | Value::Array(_) | Value::Vector(_) => {
            unreachable!("rejected by index_key_length")
        }
    }
}

pub(crate) fn read_index_key(segment: &BufferSlice, offset: usize) -> Result<bson::Value> {
    use bson::{BsonType, Value};

    let ty = BsonType::from_u8(segment.read_u8(offset)).ok_or_else(Error::invalid_page)?;
    let offset = offset + 1;

    Ok(match ty {
        BsonType::MinValue => Value::MinValue,
        BsonType::MaxValue => Value::MaxValue,
        BsonType::Null => Value::Null,
        BsonType::Int32 => Value::Int32(segment.read_i32(offset)),
        BsonType::Int64 => Value::Int64(segment.read_i64(offset)),
        BsonType::Double => Value::Double(segment.read_f64(offset)),
        BsonType::DateTime => {
            Value::DateTime(bson::DateTime::from_unix_milliseconds(segment.read_i64(offset))?)
        }
        BsonType::Decimal => Value::Decimal(bson::Decimal128::from_bytes(
            segment.read_bytes(offset, 16).try_into().unwrap(),
        )),
        BsonType::String => {
            let length = segment.read_u16(offset) as usize;
            let bytes = segment.read_bytes(offset + 2, length);
            Value::String(String::from_utf8(bytes.to_vec())?)
        }
        BsonType::Binary => {
            let length = segment.read_u16(offset) as usize;
            Value::Binary(bson::Binary::new(
                segment.read_bytes(offset + 2, length).to_vec(),
            ))
        }
        BsonType::ObjectId => Value::ObjectId(bson::ObjectId::from_bytes(
            segment.read_bytes(offset, 12).try_into().unwrap(),
        )),
        BsonType::Guid => Value::Guid(bson::Guid::from_bytes(
            segment.read_bytes(offset, 16).try_into().unwrap(),
        )),
        BsonType::Boolean => Value::Boolean(segment.read_bool(offset)),
        BsonType::Document | BsonType::Array | BsonType::Vector => {
            return Err(Error::invalid_page());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Value;

    #[test]
    fn key_roundtrip() {
        let keys = [
            Value::MinValue,
            Value::Null,
            Value::Int32(-5),
            Value::Int64(1 << 40),
            Value::Double(2.5),
            Value::String("key".into()),
            Value::Boolean(true),
            Value::ObjectId(bson::ObjectId::new()),
            Value::MaxValue,
        ];

        for key in keys {
            let mut backing = vec![0u8; 64];
            let segment = BufferSlice::new_mut(&mut backing);
            write_index_key(segment, 3, &key);
            assert_eq!(read_index_key(segment, 3).unwrap(), key);
            assert!(index_key_length(&key).unwrap() <= 64 - 3);
        }
    }

    #[test]
    fn compound_keys_are_rejected() {
        assert!(index_key_length(&Value::Array(crate::bson::Array::new())).is_err());
        assert!(index_key_length(&Value::Document(crate::bson::Document::new())).is_err());
    }
}
