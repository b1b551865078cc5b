use super::{Array, Binary, BsonTag, DateTime, Decimal128, Document, Guid, ObjectId, Value, Vector};
use crate::{Error, Result};

/// Bounds-checked cursor over serialized document bytes. Every accessor
/// fails instead of panicking; the rebuild path feeds this arbitrary page
/// content.
struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, position: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(Error::invalid_bson)?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.bytes[self.position..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(Error::invalid_bson)?;
        let s = std::str::from_utf8(&rest[..end]).map_err(|_| Error::invalid_bson())?;
        self.position += end + 1;
        Ok(s)
    }
}

/// Parses one serialized document.
pub(crate) fn read_document(bytes: &[u8]) -> Result<Document> {
    let mut reader = Reader::new(bytes);
    read_document_inner(&mut reader)
}

fn read_document_inner(reader: &mut Reader) -> Result<Document> {
    let start = reader.position;
    let length = reader.read_i32()?;
    if length < 5 || start + length as usize > reader.bytes.len() {
        return Err(Error::invalid_bson());
    }
    let end = start + length as usize;

    let mut doc = Document::new();
    loop {
        let tag = reader.read_u8()?;
        if tag == 0 {
            break;
        }
        let name = reader.read_cstring()?;
        let value = read_value(reader, tag)?;
        doc.insert(name, value);

        if reader.position > end {
            return Err(Error::invalid_bson());
        }
    }

    if reader.position != end {
        return Err(Error::invalid_bson());
    }
    Ok(doc)
}

fn read_array_inner(reader: &mut Reader) -> Result<Array> {
    let start = reader.position;
    let length = reader.read_i32()?;
    if length < 5 || start + length as usize > reader.bytes.len() {
        return Err(Error::invalid_bson());
    }
    let end = start + length as usize;

    let mut array = Array::new();
    loop {
        let tag = reader.read_u8()?;
        if tag == 0 {
            break;
        }
        // index keys are implicit in the element order
        reader.read_cstring()?;
        array.push(read_value(reader, tag)?);

        if reader.position > end {
            return Err(Error::invalid_bson());
        }
    }

    if reader.position != end {
        return Err(Error::invalid_bson());
    }
    Ok(array)
}

fn read_value(reader: &mut Reader, tag: u8) -> Result<Value> {
    let tag = BsonTag::from_i8(tag as i8).ok_or_else(Error::invalid_bson)?;

    Ok(match tag {
        BsonTag::Double => Value::Double(reader.read_f64()?),
        BsonTag::String => {
            let length = reader.read_i32()?;
            if length < 1 {
                return Err(Error::invalid_bson());
            }
            let bytes = reader.take(length as usize)?;
            let (content, terminator) = bytes.split_at(bytes.len() - 1);
            if terminator != [0] {
                return Err(Error::invalid_bson());
            }
            Value::String(
                std::str::from_utf8(content)
                    .map_err(|_| Error::invalid_bson())?
                    .to_string(),
            )
        }
        BsonTag::Document => Value::Document(read_document_inner(reader)?),
        BsonTag::Array => Value::Array(read_array_inner(reader)?),
        BsonTag::Binary => {
            let length = reader.read_i32()?;
            if length < 0 {
                return Err(Error::invalid_bson());
            }
            let subtype = reader.read_u8()?;
            let bytes = reader.take(length as usize)?;
            match subtype {
                0x04 if length == 16 => Value::Guid(Guid::from_bytes(bytes.try_into().unwrap())),
                _ => Value::Binary(Binary::new(bytes.to_vec())),
            }
        }
        BsonTag::ObjectId => {
            Value::ObjectId(ObjectId::from_bytes(reader.take(12)?.try_into().unwrap()))
        }
        BsonTag::Boolean => Value::Boolean(reader.read_u8()? != 0),
        BsonTag::DateTime => Value::DateTime(DateTime::from_unix_milliseconds(reader.read_i64()?)?),
        BsonTag::Null => Value::Null,
        BsonTag::Int32 => Value::Int32(reader.read_i32()?),
        BsonTag::Int64 => Value::Int64(reader.read_i64()?),
        BsonTag::Decimal => {
            Value::Decimal(Decimal128::from_bytes(reader.take(16)?.try_into().unwrap()))
        }
        BsonTag::Vector => {
            let count = reader.read_u16()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(reader.read_f32()?);
            }
            Value::Vector(Vector::new(values))
        }
        BsonTag::MinValue => Value::MinValue,
        BsonTag::MaxValue => Value::MaxValue,
    })
}

#[cfg(test)]
mod tests {
    use crate::bson::{Binary, DateTime, Decimal128, Document, Guid, ObjectId, Value};

    fn roundtrip(doc: &Document) -> Document {
        let bytes = doc.to_vec().unwrap();
        assert_eq!(bytes.len(), doc.serialized_len());
        Document::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn roundtrip_every_type() {
        let doc = document! {
            "null" => Value::Null,
            "i32" => 42,
            "i64" => 42i64 << 40,
            "f64" => 3.25,
            "dec" => Decimal128::from_parts(12345, 2, true),
            "str" => "hello",
            "doc" => document! { "nested" => true },
            "arr" => array![1, "two", 3.0],
            "bin" => Binary::new(vec![1, 2, 3]),
            "oid" => ObjectId::new(),
            "guid" => Guid::new(),
            "bool" => false,
            "date" => DateTime::now().truncate_to_milliseconds(),
            "vec" => vec![1.0f32, 0.0, -2.5],
        };

        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let doc = document! { "a" => 1, "b" => array![document!{ "c" => "d" }] };
        let bytes = doc.to_vec().unwrap();
        let reparsed = Document::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.to_vec().unwrap(), bytes);
    }

    #[test]
    fn depth_limit_enforced() {
        let mut doc = document! { "leaf" => 0 };
        for _ in 0..30 {
            doc = document! { "inner" => doc };
        }
        assert!(doc.to_vec().is_err());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(Document::from_bytes(&[]).is_err());
        assert!(Document::from_bytes(&[5, 0, 0, 0]).is_err());
        // declared length beyond the buffer
        assert!(Document::from_bytes(&[200, 0, 0, 0, 0]).is_err());
        // truncated element payload
        let mut bytes = document! { "a" => 1 }.to_vec().unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(Document::from_bytes(&bytes).is_err());
    }
}
