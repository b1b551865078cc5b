use super::{Array, BsonTag, Document, Value};
use crate::{Error, Result};

/// Maximum nesting (documents and arrays) a stored document may have.
pub(crate) const MAX_DOCUMENT_DEPTH: usize = 20;

pub(crate) fn write_document(out: &mut Vec<u8>, doc: &Document, depth: usize) -> Result<()> {
    if depth >= MAX_DOCUMENT_DEPTH {
        return Err(Error::document_max_depth());
    }

    let start = out.len();
    out.extend_from_slice(&[0u8; 4]);

    for (name, value) in doc.iter() {
        write_element(out, name, value, depth)?;
    }

    out.push(0);
    let length = (out.len() - start) as i32;
    out[start..start + 4].copy_from_slice(&length.to_le_bytes());
    Ok(())
}

fn write_array(out: &mut Vec<u8>, array: &Array, depth: usize) -> Result<()> {
    if depth >= MAX_DOCUMENT_DEPTH {
        return Err(Error::document_max_depth());
    }

    let start = out.len();
    out.extend_from_slice(&[0u8; 4]);

    let mut key = itoa_buffer();
    for (index, value) in array.iter().enumerate() {
        write_element(out, index_key(&mut key, index), value, depth)?;
    }

    out.push(0);
    let length = (out.len() - start) as i32;
    out[start..start + 4].copy_from_slice(&length.to_le_bytes());
    Ok(())
}

// array element names are decimal indexes; format without allocating per
// element
fn itoa_buffer() -> [u8; 20] {
    [0; 20]
}

fn index_key(buffer: &mut [u8; 20], mut index: usize) -> &str {
    let mut pos = buffer.len();
    loop {
        pos -= 1;
        buffer[pos] = b'0' + (index % 10) as u8;
        index /= 10;
        if index == 0 {
            break;
        }
    }
    std::str::from_utf8(&buffer[pos..]).unwrap()
}

fn write_element(out: &mut Vec<u8>, name: &str, value: &Value, depth: usize) -> Result<()> {
    out.push(value_tag(value) as i8 as u8);
    out.extend_from_slice(name.as_bytes());
    out.push(0);

    match value {
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(v) => {
            out.extend_from_slice(&((v.len() + 1) as i32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        Value::Document(v) => write_document(out, v, depth + 1)?,
        Value::Array(v) => write_array(out, v, depth + 1)?,
        Value::Binary(v) => {
            out.extend_from_slice(&(v.len() as i32).to_le_bytes());
            out.push(0x00);
            out.extend_from_slice(v.bytes());
        }
        Value::Guid(v) => {
            out.extend_from_slice(&16i32.to_le_bytes());
            out.push(0x04);
            out.extend_from_slice(v.as_bytes());
        }
        Value::ObjectId(v) => out.extend_from_slice(v.as_bytes()),
        Value::Boolean(v) => out.push(*v as u8),
        Value::DateTime(v) => out.extend_from_slice(&v.as_unix_milliseconds().to_le_bytes()),
        Value::Null | Value::MinValue | Value::MaxValue => {}
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Decimal(v) => out.extend_from_slice(v.bytes()),
        Value::Vector(v) => {
            out.extend_from_slice(&(v.len() as u16).to_le_bytes());
            for element in v.as_f32() {
                out.extend_from_slice(&element.to_le_bytes());
            }
        }
    }
    Ok(())
}

fn value_tag(value: &Value) -> BsonTag {
    match value {
        Value::Double(_) => BsonTag::Double,
        Value::String(_) => BsonTag::String,
        Value::Document(_) => BsonTag::Document,
        Value::Array(_) => BsonTag::Array,
        Value::Binary(_) | Value::Guid(_) => BsonTag::Binary,
        Value::ObjectId(_) => BsonTag::ObjectId,
        Value::Boolean(_) => BsonTag::Boolean,
        Value::DateTime(_) => BsonTag::DateTime,
        Value::Null => BsonTag::Null,
        Value::Int32(_) => BsonTag::Int32,
        Value::Int64(_) => BsonTag::Int64,
        Value::Decimal(_) => BsonTag::Decimal,
        Value::Vector(_) => BsonTag::Vector,
        Value::MinValue => BsonTag::MinValue,
        Value::MaxValue => BsonTag::MaxValue,
    }
}

/// Payload byte length of one value (no tag, no element name).
pub(crate) fn serialized_value_len(value: &Value) -> usize {
    match value {
        Value::Double(_) => 8,
        Value::String(v) => 4 + v.len() + 1,
        Value::Document(v) => serialized_document_len(v),
        Value::Array(v) => serialized_array_len(v),
        Value::Binary(v) => 4 + 1 + v.len(),
        Value::Guid(_) => 4 + 1 + 16,
        Value::ObjectId(_) => 12,
        Value::Boolean(_) => 1,
        Value::DateTime(_) => 8,
        Value::Null | Value::MinValue | Value::MaxValue => 0,
        Value::Int32(_) => 4,
        Value::Int64(_) => 8,
        Value::Decimal(_) => 16,
        Value::Vector(v) => v.serialized_len(),
    }
}

pub(crate) fn serialized_document_len(doc: &Document) -> usize {
    4 + doc
        .iter()
        .map(|(name, value)| 1 + name.len() + 1 + serialized_value_len(value))
        .sum::<usize>()
        + 1
}

fn serialized_array_len(array: &Array) -> usize {
    4 + array
        .iter()
        .enumerate()
        .map(|(index, value)| {
            1 + decimal_digits(index) + 1 + serialized_value_len(value)
        })
        .sum::<usize>()
        + 1
}

fn decimal_digits(mut index: usize) -> usize {
    let mut digits = 1;
    while index >= 10 {
        index /= 10;
        digits += 1;
    }
    digits
}
