//! Entry-by-entry cursor over selected TTree branches.
//!
//! ```no_run
//! use readsimple_root::RootFile;
//!
//! let f = RootFile::open("muons.root")?;
//! let tree = f.get_tree("twoMuon")?;
//! let mut sc = f.scanner(&tree, &["px", "py"])?;
//! while sc.next() {
//!     sc.scan()?;
//!     let px: f32 = sc.get(0)?;
//!     let py: f32 = sc.get(1)?;
//!     println!("{} {} {}", sc.entry(), px, py);
//! }
//! # Ok::<(), readsimple_root::RootError>(())
//! ```

use crate::basket::{Basket, load_basket};
use crate::error::{Result, RootError};
use crate::tree::{BranchInfo, Tree};
use crate::value::{FromValue, Value};

/// The basket currently held for one column.
struct Loaded {
    first: u64,
    end: u64,
    basket: Basket,
}

/// One bound branch and its basket state.
struct Column<'a> {
    branch: &'a BranchInfo,
    loaded: Option<Loaded>,
}

impl Column<'_> {
    fn read(&mut self, file_data: &[u8], entry: u64) -> Result<Value> {
        let hit = matches!(&self.loaded, Some(l) if (l.first..l.end).contains(&entry));
        if !hit {
            let idx = self.branch.basket_for_entry(entry).ok_or_else(|| {
                RootError::Scanner(format!(
                    "branch '{}' has no basket for entry {} ({} entries)",
                    self.branch.name, entry, self.branch.entries
                ))
            })?;
            let (first, end) = self.branch.basket_range(idx);
            log::debug!("branch '{}': loading basket {} [{}, {})", self.branch.name, idx, first, end);
            let basket = load_basket(file_data, self.branch, idx)?;
            self.loaded = Some(Loaded { first, end, basket });
        }

        let loaded = self.loaded.as_ref().ok_or_else(|| {
            RootError::Scanner(format!("branch '{}': no basket loaded", self.branch.name))
        })?;
        let size = self.branch.leaf_type.byte_size();
        let offset = (entry - loaded.first) as usize * size;
        let bytes = loaded.basket.values();
        if offset + size > bytes.len() {
            return Err(RootError::Deserialization(format!(
                "branch '{}': basket too short for entry {}: need {} bytes at offset {}, have {}",
                self.branch.name,
                entry,
                size,
                offset,
                bytes.len()
            )));
        }
        Ok(Value::decode(&bytes[offset..], self.branch.leaf_type))
    }
}

/// A sequential cursor over a tree, bound to a fixed set of scalar branches.
///
/// The cursor starts before the first entry: call [`next`](Self::next) to
/// advance, then [`scan`](Self::scan) to decode the bound values.
pub struct Scanner<'a> {
    file_data: &'a [u8],
    entries: u64,
    columns: Vec<Column<'a>>,
    entry: i64,
    row: Vec<Value>,
    scanned: bool,
}

impl<'a> Scanner<'a> {
    /// Bind `names` of `tree`; every branch must exist and hold one fixed-size
    /// value per entry.
    pub fn new(file_data: &'a [u8], tree: &'a Tree, names: &[&str]) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for &name in names {
            let branch =
                tree.find_branch(name).ok_or_else(|| RootError::BranchNotFound(name.to_string()))?;
            if !branch.is_scalar() {
                return Err(RootError::TypeMismatch(format!(
                    "branch '{}' is not a scalar branch (len={}, entry offsets={})",
                    name, branch.leaf_len, branch.entry_offset_len
                )));
            }
            columns.push(Column { branch, loaded: None });
        }

        Ok(Self {
            file_data,
            entries: tree.entries,
            columns,
            entry: -1,
            row: Vec::with_capacity(names.len()),
            scanned: false,
        })
    }

    /// Check that every bound column holds values of type `T`.
    pub fn require<T: FromValue>(&self) -> Result<()> {
        for col in &self.columns {
            if col.branch.leaf_type != T::LEAF_TYPE {
                return Err(RootError::TypeMismatch(format!(
                    "branch '{}' holds {}, bound as {}",
                    col.branch.name,
                    col.branch.leaf_type,
                    T::LEAF_TYPE
                )));
            }
        }
        Ok(())
    }

    /// Total entries in the tree.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Current entry index; -1 before the first [`next`](Self::next).
    pub fn entry(&self) -> i64 {
        self.entry
    }

    /// Names of the bound branches, in binding order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.branch.name.as_str()).collect()
    }

    /// Advance to the next entry. Returns `false` once the tree is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        self.scanned = false;
        if self.entry + 1 < self.entries as i64 {
            self.entry += 1;
            true
        } else {
            self.entry = self.entries as i64;
            false
        }
    }

    /// Position the cursor on `entry`, as if [`next`](Self::next) had just
    /// returned `true` for it.
    pub fn seek(&mut self, entry: u64) -> Result<()> {
        if entry >= self.entries {
            return Err(RootError::Scanner(format!(
                "entry {} out of range ({} entries)",
                entry, self.entries
            )));
        }
        self.entry = entry as i64;
        self.scanned = false;
        Ok(())
    }

    /// Decode the bound values of the current entry.
    pub fn scan(&mut self) -> Result<()> {
        if self.entry < 0 || self.entry as u64 >= self.entries {
            return Err(RootError::Scanner(format!(
                "no current entry (entry={}, entries={}): call next() first",
                self.entry, self.entries
            )));
        }
        let entry = self.entry as u64;

        self.row.clear();
        for col in &mut self.columns {
            self.row.push(col.read(self.file_data, entry)?);
        }
        self.scanned = true;
        Ok(())
    }

    /// Decoded values of the current entry, in binding order.
    pub fn values(&self) -> Result<&[Value]> {
        if !self.scanned {
            return Err(RootError::Scanner("values requested before scan()".into()));
        }
        Ok(&self.row)
    }

    /// Decoded value of bound column `i`.
    pub fn value(&self, i: usize) -> Result<&Value> {
        self.values()?.get(i).ok_or_else(|| {
            RootError::Scanner(format!("column {} out of range ({} bound)", i, self.columns.len()))
        })
    }

    /// Value of bound column `i` as `T` (exact type match).
    pub fn get<T: FromValue>(&self, i: usize) -> Result<T> {
        let v = self.value(i)?;
        T::from_value(v).ok_or_else(|| {
            RootError::TypeMismatch(format!(
                "branch '{}' holds {}, requested {}",
                self.columns[i].branch.name,
                v.leaf_type(),
                T::LEAF_TYPE
            ))
        })
    }
}
