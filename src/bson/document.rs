use super::Value;
use crate::Result;
use indexmap::IndexMap;

static NULL: Value = Value::Null;

/// A string-keyed bson mapping preserving insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value for `key`, or `Null` when absent.
    pub fn get(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&NULL)
    }

    pub fn try_get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Serializes into standard document bytes (`i32` length prefix,
    /// tagged elements, zero terminator).
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(super::serialized_document_len(self));
        super::write_document(&mut out, self, 0)?;
        Ok(out)
    }

    /// Parses document bytes produced by [`Document::to_vec`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Document> {
        super::read_document(bytes)
    }

    /// Exact serialized byte length, including length prefix and
    /// terminator.
    pub fn serialized_len(&self) -> usize {
        super::serialized_document_len(self)
    }

    /// Resolves a `$.a.b` style path against this document. A bare field
    /// name (no `$.` prefix) addresses a top-level field.
    pub fn get_path(&self, path: &str) -> &Value {
        let path = path.strip_prefix("$.").unwrap_or(path);
        if path == "$" {
            return &NULL;
        }

        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = current.get(segment);
            if segments.peek().is_none() {
                return value;
            }
            match value {
                Value::Document(doc) => current = doc,
                _ => return &NULL,
            }
        }
        &NULL
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::bson::Value;

    #[test]
    fn path_resolution() {
        let doc = document! {
            "name" => "John",
            "address" => document! { "city" => "Porto", "geo" => document! { "lat" => 41.1 } },
        };

        assert_eq!(doc.get_path("$.name").as_str(), Some("John"));
        assert_eq!(doc.get_path("address.city").as_str(), Some("Porto"));
        assert_eq!(doc.get_path("$.address.geo.lat"), &Value::Double(41.1));
        assert!(doc.get_path("$.missing.field").is_null());
    }

    #[test]
    fn insertion_order_is_preserved() {
        let doc = document! { "z" => 1, "a" => 2, "m" => 3 };
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }
}
