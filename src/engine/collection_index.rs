use crate::Result;
use crate::engine::PageAddress;
use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;

/// Catalog entry kind: ordered skiplist or vector graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexType {
    Ordered = 0,
    Vector = 1,
}

/// Distance function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDistanceMetric {
    /// `1 - cos(a, b)`; 0 for parallel vectors, 2 for opposite ones.
    Cosine = 0,
    Euclidean = 1,
    /// Negative dot product, so that smaller is nearer.
    DotProduct = 2,
}

impl VectorDistanceMetric {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cosine),
            1 => Some(Self::Euclidean),
            2 => Some(Self::DotProduct),
            _ => None,
        }
    }

    pub(crate) fn distance(&self, left: &[f32], right: &[f32]) -> f64 {
        debug_assert_eq!(left.len(), right.len(), "dimension checked on insert");

        match self {
            VectorDistanceMetric::Cosine => {
                let mut dot = 0f64;
                let mut norm_left = 0f64;
                let mut norm_right = 0f64;
                for (l, r) in left.iter().zip(right) {
                    dot += *l as f64 * *r as f64;
                    norm_left += (*l as f64).powi(2);
                    norm_right += (*r as f64).powi(2);
                }
                if norm_left == 0.0 || norm_right == 0.0 {
                    return f64::MAX;
                }
                1.0 - dot / (norm_left.sqrt() * norm_right.sqrt())
            }
            VectorDistanceMetric::Euclidean => left
                .iter()
                .zip(right)
                .map(|(l, r)| ((*l - *r) as f64).powi(2))
                .sum::<f64>()
                .sqrt(),
            VectorDistanceMetric::DotProduct => {
                -left
                    .iter()
                    .zip(right)
                    .map(|(l, r)| *l as f64 * *r as f64)
                    .sum::<f64>()
            }
        }
    }
}

/// One index in the collection catalog. Ordered indexes use `head`/`tail`
/// as the skiplist sentinels; vector indexes use `head` as the graph entry
/// node and `tail` as the first node of the insertion-order chain.
#[derive(Debug, Clone)]
pub(crate) struct CollectionIndex {
    slot: u8,
    index_type: IndexType,
    name: String,
    expression: String,
    unique: bool,
    head: PageAddress,
    tail: PageAddress,
    reserved: u8,
    free_index_page_list: u32,

    // vector metadata; zero for ordered indexes
    dims: u16,
    metric: u8,
    node_count: u32,
}

impl CollectionIndex {
    pub fn new(slot: u8, index_type: IndexType, name: String, expression: String, unique: bool) -> Self {
        Self {
            slot,
            index_type,
            name,
            expression,
            unique,
            head: PageAddress::EMPTY,
            tail: PageAddress::EMPTY,
            reserved: 0,
            free_index_page_list: u32::MAX,
            dims: 0,
            metric: 0,
            node_count: 0,
        }
    }

    pub fn load(reader: &mut BufferReader) -> Result<Self> {
        let slot = reader.read_u8();
        let index_type = match reader.read_u8() {
            0 => IndexType::Ordered,
            1 => IndexType::Vector,
            _ => return Err(crate::Error::invalid_page()),
        };
        let name = reader.read_cstring()?;
        let expression = reader.read_cstring()?;
        let unique = reader.read_bool();
        let head = reader.read_page_address();
        let tail = reader.read_page_address();
        let reserved = reader.read_u8();
        let free_index_page_list = reader.read_u32();
        let dims = reader.read_u16();
        let metric = reader.read_u8();
        let node_count = reader.read_u32();

        Ok(Self {
            slot,
            index_type,
            name,
            expression,
            unique,
            head,
            tail,
            reserved,
            free_index_page_list,
            dims,
            metric,
            node_count,
        })
    }

    pub fn update_buffer(&self, writer: &mut BufferWriter) {
        writer.write_u8(self.slot);
        writer.write_u8(self.index_type as u8);
        writer.write_cstring(&self.name);
        writer.write_cstring(&self.expression);
        writer.write_bool(self.unique);
        writer.write_page_address(self.head);
        writer.write_page_address(self.tail);
        writer.write_u8(self.reserved);
        writer.write_u32(self.free_index_page_list);
        writer.write_u16(self.dims);
        writer.write_u8(self.metric);
        writer.write_u32(self.node_count);
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn head(&self) -> PageAddress {
        self.head
    }

    pub fn set_head(&mut self, address: PageAddress) {
        self.head = address;
    }

    pub fn tail(&self) -> PageAddress {
        self.tail
    }

    pub fn set_tail(&mut self, address: PageAddress) {
        self.tail = address;
    }

    pub fn free_index_page_list(&self) -> u32 {
        self.free_index_page_list
    }

    pub fn set_free_index_page_list(&mut self, page_id: u32) {
        self.free_index_page_list = page_id;
    }

    pub fn dims(&self) -> u16 {
        self.dims
    }

    pub fn set_dims(&mut self, dims: u16) {
        self.dims = dims;
    }

    pub fn metric(&self) -> VectorDistanceMetric {
        VectorDistanceMetric::from_u8(self.metric).unwrap_or(VectorDistanceMetric::Cosine)
    }

    pub fn set_metric(&mut self, metric: VectorDistanceMetric) {
        self.metric = metric as u8;
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn set_node_count(&mut self, count: u32) {
        self.node_count = count;
    }

    pub fn get_length(&self) -> usize {
        Self::get_length_static(&self.name, &self.expression)
    }

    pub fn get_length_static(name: &str, expression: &str) -> usize {
        1 + 1
            + name.len()
            + 1
            + expression.len()
            + 1
            + 1
            + PageAddress::SERIALIZED_SIZE
            + PageAddress::SERIALIZED_SIZE
            + 1
            + 4
            + 2
            + 1
            + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance() {
        let metric = VectorDistanceMetric::Cosine;
        assert!(metric.distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        let diagonal = metric.distance(&[1.0, 0.0], &[1.0, 1.0]);
        assert!((diagonal - 0.2928).abs() < 1e-3);
        assert_eq!(metric.distance(&[0.0, 0.0], &[1.0, 0.0]), f64::MAX);
    }

    #[test]
    fn euclidean_and_dot() {
        assert_eq!(
            VectorDistanceMetric::Euclidean.distance(&[0.0, 3.0], &[4.0, 0.0]),
            5.0
        );
        assert_eq!(
            VectorDistanceMetric::DotProduct.distance(&[1.0, 2.0], &[3.0, 4.0]),
            -11.0
        );
    }
}
