//! Cell encoding and decoding.
//!
//! Cells are the variable-length records stored within B-tree pages.
//! Leaf cells carry a key and its value (inline, or a pointer to an
//! overflow chain); interior cells carry a separator key and the child
//! page holding keys greater than or equal to it.

use crate::types::{decode_varint, put_varint, varint_size, PageId};

const FLAG_INLINE: u8 = 0;
const FLAG_OVERFLOW: u8 = 1;

/// Type of cell stored in a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// Leaf cell: key + value
    Leaf,
    /// Interior cell: separator key + child pointer
    Interior,
}

/// Where a leaf cell's value lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// Stored in the cell itself
    Inline(Vec<u8>),
    /// Stored in a chain of overflow pages starting at `head`
    Overflow { head: PageId, len: u64 },
}

impl CellValue {
    /// Length of the logical value in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::Inline(v) => v.len() as u64,
            Self::Overflow { len, .. } => *len,
        }
    }

    /// Whether the logical value is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cell within a B-tree page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Type of this cell
    pub cell_type: CellType,
    /// The key bytes
    pub key: Vec<u8>,
    /// The value (leaf cells only)
    pub value: CellValue,
    /// Child page for keys >= `key` (interior cells only)
    pub child: PageId,
}

impl Cell {
    /// Create a leaf cell with an inline value
    pub fn new_leaf(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::with_value(key, CellValue::Inline(value))
    }

    /// Create a leaf cell from an already-placed value
    pub fn with_value(key: Vec<u8>, value: CellValue) -> Self {
        Self {
            cell_type: CellType::Leaf,
            key,
            value,
            child: PageId::NONE,
        }
    }

    /// Create an interior cell with a separator key and child pointer
    pub fn new_interior(key: Vec<u8>, child: PageId) -> Self {
        Self {
            cell_type: CellType::Interior,
            key,
            value: CellValue::Inline(Vec::new()),
            child,
        }
    }

    /// Encoded size of this cell in bytes (excluding its slot pointer)
    pub fn encoded_size(&self) -> usize {
        let key_part = varint_size(self.key.len() as u64) + self.key.len();
        match self.cell_type {
            CellType::Leaf => {
                let value_part = match &self.value {
                    CellValue::Inline(v) => v.len(),
                    CellValue::Overflow { .. } => 4,
                };
                key_part + 1 + varint_size(self.value.len()) + value_part
            }
            CellType::Interior => 4 + key_part,
        }
    }

    /// Space this cell takes in a page, slot pointer included
    pub fn footprint(&self) -> usize {
        self.encoded_size() + 2
    }

    /// Encode this cell into bytes
    ///
    /// Leaf: `key_len | flag | value_len | key | value-or-head`.
    /// Interior: `child | key_len | key`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());

        match self.cell_type {
            CellType::Leaf => {
                put_varint(&mut buf, self.key.len() as u64);
                match &self.value {
                    CellValue::Inline(v) => {
                        buf.push(FLAG_INLINE);
                        put_varint(&mut buf, v.len() as u64);
                        buf.extend_from_slice(&self.key);
                        buf.extend_from_slice(v);
                    }
                    CellValue::Overflow { head, len } => {
                        buf.push(FLAG_OVERFLOW);
                        put_varint(&mut buf, *len);
                        buf.extend_from_slice(&self.key);
                        buf.extend_from_slice(&head.to_be_bytes());
                    }
                }
            }
            CellType::Interior => {
                buf.extend_from_slice(&self.child.to_be_bytes());
                put_varint(&mut buf, self.key.len() as u64);
                buf.extend_from_slice(&self.key);
            }
        }

        buf
    }

    /// Decode a leaf cell from bytes
    pub fn decode_leaf(bytes: &[u8]) -> Option<Self> {
        let (key_len, mut offset) = decode_varint(bytes)?;
        let flag = *bytes.get(offset)?;
        offset += 1;
        let (value_len, n) = decode_varint(&bytes[offset..])?;
        offset += n;

        let key = take(bytes, &mut offset, usize::try_from(key_len).ok()?)?.to_vec();
        let value = match flag {
            FLAG_INLINE => {
                CellValue::Inline(take(bytes, &mut offset, usize::try_from(value_len).ok()?)?.to_vec())
            }
            FLAG_OVERFLOW => CellValue::Overflow {
                head: PageId::from_be_slice(take(bytes, &mut offset, 4)?),
                len: value_len,
            },
            _ => return None,
        };

        Some(Self::with_value(key, value))
    }

    /// Decode an interior cell from bytes
    pub fn decode_interior(bytes: &[u8]) -> Option<Self> {
        let mut offset = 0;
        let child = PageId::from_be_slice(take(bytes, &mut offset, 4)?);
        let (key_len, n) = decode_varint(&bytes[offset..])?;
        offset += n;
        let key = take(bytes, &mut offset, usize::try_from(key_len).ok()?)?.to_vec();

        Some(Self::new_interior(key, child))
    }
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Option<&'a [u8]> {
    let end = offset.checked_add(len)?;
    let slice = bytes.get(*offset..end)?;
    *offset = end;
    Some(slice)
}
