//! Column-oriented data extraction from TTree branches.

use crate::basket::{Basket, load_basket};
use crate::error::{Result, RootError};
use crate::tree::{BranchInfo, LeafType};
use crate::value::Value;

/// Reader for extracting a whole column from a TTree branch.
///
/// Supports fixed-size leaves (scalars and fixed arrays); values of one entry
/// are laid out contiguously, `leaf_len` elements per entry.
pub struct BranchReader<'a> {
    file_data: &'a [u8],
    branch: &'a BranchInfo,
}

impl<'a> BranchReader<'a> {
    /// Create a new branch reader.
    pub fn new(file_data: &'a [u8], branch: &'a BranchInfo) -> Self {
        Self { file_data, branch }
    }

    /// Branch metadata.
    pub fn branch(&self) -> &BranchInfo {
        self.branch
    }

    /// Read all elements as decoded [`Value`]s.
    pub fn values(&self) -> Result<Vec<Value>> {
        let leaf_type = self.branch.leaf_type;
        let size = leaf_type.byte_size();
        let entry_bytes = size * self.branch.leaf_len;
        let mut out = Vec::with_capacity(self.expected_len());
        for (n_entries, basket) in self.read_all_baskets()? {
            let bytes = &basket.values()[..n_entries * entry_bytes];
            out.extend(bytes.chunks_exact(size).map(|c| Value::decode(c, leaf_type)));
        }
        Ok(out)
    }

    /// Read all entries as `f64`, converting from the native type.
    pub fn as_f64(&self) -> Result<Vec<f64>> {
        Ok(self.values()?.iter().map(Value::as_f64).collect())
    }

    /// Read all entries of a `TLeafF` branch as `f32`.
    pub fn as_f32(&self) -> Result<Vec<f32>> {
        if self.branch.leaf_type != LeafType::F32 {
            return Err(RootError::TypeMismatch(format!(
                "branch '{}' holds {}, not float32",
                self.branch.name, self.branch.leaf_type
            )));
        }
        Ok(self
            .values()?
            .into_iter()
            .filter_map(|v| match v {
                Value::F32(x) => Some(x),
                _ => None,
            })
            .collect())
    }

    /// Read all entries of an integer branch as `i64`.
    pub fn as_i64(&self) -> Result<Vec<i64>> {
        self.values()?
            .iter()
            .map(|v| {
                v.as_i64().ok_or_else(|| {
                    RootError::TypeMismatch(format!(
                        "branch '{}' value {} does not fit in int64",
                        self.branch.name, v
                    ))
                })
            })
            .collect()
    }

    fn expected_len(&self) -> usize {
        self.branch.entries as usize * self.branch.leaf_len
    }

    /// Read every non-empty basket together with its entry count, checking
    /// each one holds enough bytes for its entry range.
    fn read_all_baskets(&self) -> Result<Vec<(usize, Basket)>> {
        if self.branch.entry_offset_len != 0 {
            return Err(RootError::TypeMismatch(format!(
                "branch '{}' has variable-size entries",
                self.branch.name
            )));
        }
        let entry_bytes = self.branch.leaf_type.byte_size() * self.branch.leaf_len;

        let mut out = Vec::with_capacity(self.branch.basket_count());
        let mut total = 0u64;
        for i in 0..self.branch.basket_count() {
            let (first, end) = self.branch.basket_range(i);
            if first == end {
                continue;
            }
            let basket = load_basket(self.file_data, self.branch, i)?;
            let need = (end - first) as usize * entry_bytes;
            if basket.values().len() < need {
                return Err(RootError::Deserialization(format!(
                    "branch '{}' basket {}: {} value bytes for {} entries of {} bytes",
                    self.branch.name,
                    i,
                    basket.values().len(),
                    end - first,
                    entry_bytes
                )));
            }
            total += end - first;
            out.push(((end - first) as usize, basket));
        }

        if total != self.branch.entries {
            return Err(RootError::Deserialization(format!(
                "branch '{}': baskets cover {} entries, expected {}",
                self.branch.name, total, self.branch.entries
            )));
        }
        Ok(out)
    }
}
