/// A packed float32 embedding.
///
/// Serialized as `u16` element count followed by the little-endian f32
/// elements; the element count is therefore capped at `u16::MAX`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector(Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        assert!(values.len() <= u16::MAX as usize, "vector too long");
        Vector(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_f32(&self) -> &[f32] {
        &self.0
    }

    /// Serialized payload length.
    pub fn serialized_len(&self) -> usize {
        2 + self.0.len() * 4
    }
}

impl From<Vec<f32>> for Vector {
    fn from(values: Vec<f32>) -> Self {
        Vector::new(values)
    }
}

impl From<&[f32]> for Vector {
    fn from(values: &[f32]) -> Self {
        Vector::new(values.to_vec())
    }
}
