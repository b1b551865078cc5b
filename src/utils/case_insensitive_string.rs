use std::hash::{Hash, Hasher};

/// Map key comparing case-insensitively (collection and sequence names).
#[derive(Debug, Clone)]
pub(crate) struct CaseInsensitiveString(String);

impl CaseInsensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        CaseInsensitiveString(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CaseInsensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CaseInsensitiveString {}

impl Hash for CaseInsensitiveString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl From<&str> for CaseInsensitiveString {
    fn from(value: &str) -> Self {
        CaseInsensitiveString(value.to_string())
    }
}
