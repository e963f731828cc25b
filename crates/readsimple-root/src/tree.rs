//! Public types for TTree branch metadata.

use std::fmt;

use crate::basket::Basket;

/// Leaf data type (maps to ROOT TLeaf class names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafType {
    /// `TLeafF`: 32-bit float.
    F32,
    /// `TLeafD`: 64-bit float.
    F64,
    /// `TLeafI`: 32-bit signed integer.
    I32,
    /// `TLeafL`: 64-bit signed integer.
    I64,
    /// `TLeafI` unsigned variant.
    U32,
    /// `TLeafL` unsigned variant.
    U64,
    /// `TLeafS`: 16-bit signed integer.
    I16,
    /// `TLeafS` unsigned variant.
    U16,
    /// `TLeafB`: 8-bit signed integer.
    I8,
    /// `TLeafB` unsigned variant.
    U8,
    /// `TLeafO`: boolean (1 byte).
    Bool,
}

impl LeafType {
    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        match self {
            LeafType::F32 | LeafType::I32 | LeafType::U32 => 4,
            LeafType::F64 | LeafType::I64 | LeafType::U64 => 8,
            LeafType::I16 | LeafType::U16 => 2,
            LeafType::I8 | LeafType::U8 | LeafType::Bool => 1,
        }
    }

    /// The unsigned counterpart of an integer type (`self` otherwise).
    pub fn to_unsigned(self) -> Self {
        match self {
            LeafType::I32 => LeafType::U32,
            LeafType::I64 => LeafType::U64,
            LeafType::I16 => LeafType::U16,
            LeafType::I8 => LeafType::U8,
            other => other,
        }
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeafType::F32 => "float32",
            LeafType::F64 => "float64",
            LeafType::I32 => "int32",
            LeafType::I64 => "int64",
            LeafType::U32 => "uint32",
            LeafType::U64 => "uint64",
            LeafType::I16 => "int16",
            LeafType::U16 => "uint16",
            LeafType::I8 => "int8",
            LeafType::U8 => "uint8",
            LeafType::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// Metadata for a single TBranch in a TTree.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch name.
    pub name: String,
    /// Branch title (leaflist, e.g. `px/F`).
    pub title: String,
    /// Data type of leaves.
    pub leaf_type: LeafType,
    /// Elements per entry for fixed-size leaves (`fLen`, 1 for scalars).
    pub leaf_len: usize,
    /// Entry-offset table length (non-zero for variable-size entries).
    pub entry_offset_len: usize,
    /// Total number of entries in this branch.
    pub entries: u64,
    /// Compressed byte sizes of the baskets stored on disk.
    pub basket_bytes: Vec<u32>,
    /// First entry of every basket (on disk, then recovered), followed by
    /// the end of the last one.
    pub basket_entry: Vec<u64>,
    /// Absolute file offsets (seek positions) of the baskets stored on disk.
    pub basket_seek: Vec<u64>,
    /// Number of baskets stored under their own key.
    pub n_baskets: usize,
    /// Baskets recovered from the tree metadata of a file that was not
    /// closed; they follow the on-disk baskets in entry order.
    pub recovered: Vec<Basket>,
}

impl BranchInfo {
    /// Number of baskets, on disk and recovered.
    pub fn basket_count(&self) -> usize {
        self.n_baskets + self.recovered.len()
    }

    /// Whether each entry holds exactly one fixed-size value.
    pub fn is_scalar(&self) -> bool {
        self.leaf_len == 1 && self.entry_offset_len == 0
    }

    /// Entry range `[first, end)` covered by basket `i`.
    pub fn basket_range(&self, i: usize) -> (u64, u64) {
        let first = self.basket_entry.get(i).copied().unwrap_or(0);
        let end = self.basket_entry.get(i + 1).copied().unwrap_or(self.entries).min(self.entries);
        (first, end.max(first))
    }

    /// Index of the basket holding `entry`, if any.
    pub fn basket_for_entry(&self, entry: u64) -> Option<usize> {
        let count = self.basket_count();
        if entry >= self.entries || count == 0 {
            return None;
        }
        // basket_entry[i] = first entry of basket i; pick the last basket
        // whose first entry is <= `entry`.
        let starts = &self.basket_entry[..count.min(self.basket_entry.len())];
        let idx = match starts.binary_search(&entry) {
            Ok(i) => i,
            Err(i) => i.checked_sub(1)?,
        };
        Some(idx)
    }
}

/// A parsed TTree with branch metadata.
#[derive(Debug, Clone)]
pub struct Tree {
    /// Tree name.
    pub name: String,
    /// Tree title.
    pub title: String,
    /// Total number of entries.
    pub entries: u64,
    /// Flat list of all branches (including sub-branches).
    pub branches: Vec<BranchInfo>,
}

impl Tree {
    /// Find a branch by name.
    pub fn find_branch(&self, name: &str) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// List all branch names.
    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(basket_entry: Vec<u64>, entries: u64) -> BranchInfo {
        let n_baskets = basket_entry.len().saturating_sub(1);
        BranchInfo {
            name: "px".into(),
            title: "px/F".into(),
            leaf_type: LeafType::F32,
            leaf_len: 1,
            entry_offset_len: 0,
            entries,
            basket_bytes: vec![0; n_baskets],
            basket_entry,
            basket_seek: vec![0; n_baskets],
            n_baskets,
            recovered: Vec::new(),
        }
    }

    #[test]
    fn basket_lookup() {
        let b = branch(vec![0, 10, 25, 40], 40);
        assert_eq!(b.basket_for_entry(0), Some(0));
        assert_eq!(b.basket_for_entry(9), Some(0));
        assert_eq!(b.basket_for_entry(10), Some(1));
        assert_eq!(b.basket_for_entry(39), Some(2));
        assert_eq!(b.basket_for_entry(40), None);
        assert_eq!(b.basket_range(1), (10, 25));
        assert_eq!(b.basket_range(2), (25, 40));
    }

    #[test]
    fn empty_branch_has_no_baskets() {
        let b = branch(vec![0], 0);
        assert_eq!(b.basket_for_entry(0), None);
    }

    #[test]
    fn leaf_sizes_and_names() {
        assert_eq!(LeafType::F32.byte_size(), 4);
        assert_eq!(LeafType::U64.byte_size(), 8);
        assert_eq!(LeafType::Bool.byte_size(), 1);
        assert_eq!(LeafType::I16.to_unsigned(), LeafType::U16);
        assert_eq!(LeafType::F64.to_unsigned(), LeafType::F64);
        assert_eq!(LeafType::F32.to_string(), "float32");
    }
}
