//! TTree and TBranch binary deserialization from ROOT streamer format.

use std::collections::HashMap;

use crate::basket::{Basket, read_embedded_basket};
use crate::error::{Result, RootError};
use crate::rbuffer::{K_BYTE_COUNT_MASK, RBuffer};
use crate::tree::{BranchInfo, LeafType, Tree};

/// Oldest TTree streamer version whose layout is understood.
const MIN_TREE_VERSION: u16 = 16;
/// Oldest TBranch streamer version whose layout is understood.
const MIN_BRANCH_VERSION: u16 = 10;

/// Read a TTree from a decompressed TKey payload.
///
/// `key_len` is the length of the key header that preceded the payload on
/// disk; class references inside the stream are offsets relative to it.
pub fn read_ttree(payload: &[u8], key_len: usize) -> Result<Tree> {
    let mut r = RBuffer::new(payload);
    let mut refs = ClassRefs::new(key_len);
    read_ttree_body(&mut r, &mut refs)
}

/// Read a TNtuple (a TTree with an extra variable count) from a TKey payload.
pub fn read_tntuple(payload: &[u8], key_len: usize) -> Result<Tree> {
    let mut r = RBuffer::new(payload);
    let mut refs = ClassRefs::new(key_len);
    let (_ver, end) = r.read_version()?;
    end.ok_or_else(|| RootError::Deserialization("TNtuple missing byte count".into()))?;
    read_ttree_body(&mut r, &mut refs)
}

fn read_ttree_body(r: &mut RBuffer, refs: &mut ClassRefs) -> Result<Tree> {
    let (tree_ver, tree_end) = r.read_version()?;
    let tree_end =
        tree_end.ok_or_else(|| RootError::Deserialization("TTree missing byte count".into()))?;
    if tree_ver < MIN_TREE_VERSION {
        return Err(RootError::UnsupportedVersion { what: "TTree", version: tree_ver as u32 });
    }

    let (name, title) = r.read_tnamed()?;

    // TAttLine, TAttFill, TAttMarker
    r.skip_versioned()?;
    r.skip_versioned()?;
    r.skip_versioned()?;

    let entries = r.read_i64()?.max(0) as u64; // fEntries
    let _tot_bytes = r.read_i64()?;
    let _zip_bytes = r.read_i64()?;
    let _saved_bytes = r.read_i64()?;

    if tree_ver >= 18 {
        let _flushed_bytes = r.read_i64()?;
    }

    let _weight = r.read_f64()?;
    let _timer_interval = r.read_i32()?;
    let _scan_field = r.read_i32()?;
    let _update = r.read_i32()?;

    if tree_ver >= 18 {
        let _default_entry_offset_len = r.read_i32()?;
    }

    let n_cluster_range = if tree_ver >= 19 { r.read_i32()?.max(0) as usize } else { 0 };

    let _max_entries = r.read_i64()?;
    let _max_entry_loop = r.read_i64()?;
    let _max_virtual_size = r.read_i64()?;
    let _auto_save = r.read_i64()?;

    if tree_ver >= 18 {
        let _auto_flush = r.read_i64()?;
    }

    let _estimate = r.read_i64()?;

    // fClusterRangeEnd / fClusterSize: flag byte, then the array when the flag is set.
    if tree_ver >= 19 {
        read_i64_array(r, n_cluster_range)?;
        read_i64_array(r, n_cluster_range)?;
    }

    if tree_ver >= 20 {
        r.skip_versioned()?; // fIOFeatures
    }

    let branches = read_branch_array(r, refs)?;
    log::debug!("TTree '{}' v{}: {} entries, {} branches", name, tree_ver, entries, branches.len());

    // fLeaves, fAliases, fIndexValues, ... are not needed.
    r.set_pos(tree_end);

    Ok(Tree { name, title, entries, branches })
}

// ── Object references ─────────────────────────────────────────

const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
const K_CLASS_MASK: u32 = 0x8000_0000;
/// Offset added to every stream position stored in the reference map.
const K_MAP_OFFSET: usize = 2;

/// One element read through ROOT's `ReadObjectAny` protocol.
#[derive(Debug)]
enum Element {
    /// Null pointer.
    Null,
    /// Back-reference to an object read earlier in the stream.
    Ref,
    /// A new object of `class_name`; its data ends at `end`.
    Object { class_name: String, end: usize },
}

/// Class-tag table for ROOT's reference system.
///
/// - `kNewClassTag (0xFFFFFFFF)` introduces a new class name (NUL-terminated)
/// - `kClassMask (0x80000000) | ref` refers to a class introduced earlier
/// - a tag without `kClassMask` refers to an object (or is null when zero)
///
/// A new class is registered under the stream position of its tag, shifted by
/// the key length and `kMapOffset`. The table spans the whole object stream:
/// a `TLeafF` introduced in the first branch is referenced from later ones.
struct ClassRefs {
    displacement: usize,
    classes: HashMap<usize, String>,
}

impl ClassRefs {
    fn new(displacement: usize) -> Self {
        Self { displacement, classes: HashMap::new() }
    }

    fn read_element(&mut self, r: &mut RBuffer) -> Result<Element> {
        let beg = r.pos();
        let bcnt = r.read_u32()?;

        if bcnt & K_BYTE_COUNT_MASK == 0 || bcnt == K_NEW_CLASS_TAG {
            return match bcnt {
                0 => Ok(Element::Null),
                K_NEW_CLASS_TAG => Err(RootError::Deserialization(format!(
                    "object without byte count at pos {}",
                    beg
                ))),
                tag if tag & K_CLASS_MASK == 0 => Ok(Element::Ref),
                tag => Err(RootError::Deserialization(format!(
                    "unexpected tag {:#010x} at pos {}",
                    tag, beg
                ))),
            };
        }

        let end = beg + 4 + (bcnt & !K_BYTE_COUNT_MASK) as usize;
        if end > r.len() {
            return Err(RootError::BufferUnderflow {
                offset: beg,
                need: end - beg,
                have: r.len() - beg,
            });
        }
        let tag_pos = r.pos();
        let tag = r.read_u32()?;

        if tag == K_NEW_CLASS_TAG {
            let class_name = r.read_cstring()?;
            self.classes.insert(tag_pos + self.displacement + K_MAP_OFFSET, class_name.clone());
            Ok(Element::Object { class_name, end })
        } else if tag & K_CLASS_MASK != 0 {
            let reference = (tag & !K_CLASS_MASK) as usize;
            match self.classes.get(&reference) {
                Some(class_name) => Ok(Element::Object { class_name: class_name.clone(), end }),
                None => Err(RootError::Deserialization(format!(
                    "class reference {} at pos {} not found ({} classes known)",
                    reference,
                    tag_pos,
                    self.classes.len()
                ))),
            }
        } else {
            // Object reference wrapped in a byte count: nothing to read.
            r.set_pos(end);
            Ok(Element::Ref)
        }
    }
}

/// Read the header of a TObjArray and return `(element_count, end_pos)`.
fn read_objarray_header(r: &mut RBuffer) -> Result<(usize, usize)> {
    let (_ver, arr_end) = r.read_version()?;
    let arr_end =
        arr_end.ok_or_else(|| RootError::Deserialization("TObjArray missing byte count".into()))?;
    r.read_tobject()?;
    let _name = r.read_string()?;
    let count = r.read_i32()?;
    let _low_bound = r.read_i32()?;
    if count < 0 {
        return Err(RootError::Deserialization(format!("TObjArray with {} elements", count)));
    }
    Ok((count as usize, arr_end))
}

/// Read a TObjArray of branches, flattening sub-branches.
fn read_branch_array(r: &mut RBuffer, refs: &mut ClassRefs) -> Result<Vec<BranchInfo>> {
    let (count, arr_end) = read_objarray_header(r)?;

    let mut branches = Vec::new();
    for idx in 0..count {
        let (class_name, end) = match refs.read_element(r)? {
            Element::Null | Element::Ref => continue,
            Element::Object { class_name, end } => (class_name, end),
        };

        let parsed = match class_name.as_str() {
            "TBranch" => read_tbranch(r, refs),
            "TBranchElement" => read_tbranch_element(r, refs),
            other => Err(RootError::UnsupportedClass(other.to_string())),
        };
        match parsed {
            Ok(found) => branches.extend(found),
            Err(e) => log::debug!("skipping branch {} ({}): {}", idx, class_name, e),
        }
        r.set_pos(end);
    }

    r.set_pos(arr_end);
    Ok(branches)
}

/// Read a branch's `fBaskets` TObjArray and keep the TBasket elements it
/// holds (null slots are skipped).
fn read_basket_array(r: &mut RBuffer, refs: &mut ClassRefs, branch: &str) -> Result<Vec<Basket>> {
    let (count, arr_end) = read_objarray_header(r)?;

    let mut baskets = Vec::new();
    for _ in 0..count {
        let (class_name, end) = match refs.read_element(r)? {
            Element::Null | Element::Ref => continue,
            Element::Object { class_name, end } => (class_name, end),
        };
        if class_name == "TBasket" {
            match read_embedded_basket(r) {
                Ok(basket) => baskets.push(basket),
                Err(e) => log::debug!("branch '{}': skipping embedded basket: {}", branch, e),
            }
        }
        r.set_pos(end);
    }

    r.set_pos(arr_end);
    Ok(baskets)
}

// ── TBranch parsing ────────────────────────────────────────────

/// Read a TBranch; returns the branch itself and/or its flattened sub-branches.
fn read_tbranch(r: &mut RBuffer, refs: &mut ClassRefs) -> Result<Vec<BranchInfo>> {
    let (branch_ver, branch_end) = r.read_version()?;
    let branch_end = branch_end
        .ok_or_else(|| RootError::Deserialization("TBranch missing byte count".into()))?;
    if branch_ver < MIN_BRANCH_VERSION {
        return Err(RootError::UnsupportedVersion { what: "TBranch", version: branch_ver as u32 });
    }

    let (name, title) = r.read_tnamed()?;

    r.skip_versioned()?; // TAttFill

    let _compress = r.read_i32()?;
    let _basket_size = r.read_i32()?;
    let entry_offset_len = r.read_i32()?.max(0) as usize;
    let write_basket = r.read_i32()?.max(0) as usize; // index of the basket being filled
    let _entry_number = r.read_i64()?;

    if branch_ver >= 13 {
        r.skip_versioned()?; // fIOFeatures
    }

    let _offset = r.read_i32()?;
    let max_baskets = r.read_i32()?.max(0) as usize;
    let _split_level = r.read_i32()?;
    let entries = r.read_i64()?.max(0) as u64;

    if branch_ver >= 11 {
        let _first_entry = r.read_i64()?;
    }

    let _tot_bytes = r.read_i64()?;
    let _zip_bytes = r.read_i64()?;

    let sub_branches = read_branch_array(r, refs)?;
    let leaf = read_leaf_array(r, refs)?;

    let embedded = read_basket_array(r, refs, &name)?;

    if write_basket > max_baskets {
        return Err(RootError::Deserialization(format!(
            "branch '{}': fWriteBasket {} > fMaxBaskets {}",
            name, write_basket, max_baskets
        )));
    }

    let basket_bytes = read_i32_array(r, max_baskets)?;
    let basket_entry = read_i64_array(r, max_baskets)?;
    let basket_seek = read_i64_array(r, max_baskets)?;

    // Baskets on disk: the first fWriteBasket with a non-zero seek.
    let n_baskets = basket_seek.iter().take(write_basket).take_while(|&&s| s > 0).count();
    let basket_bytes: Vec<u32> =
        basket_bytes.into_iter().take(n_baskets).map(|v| v.max(0) as u32).collect();
    let basket_seek: Vec<u64> =
        basket_seek.into_iter().take(n_baskets).map(|v| v as u64).collect();
    let mut basket_entry: Vec<u64> =
        basket_entry.into_iter().take(n_baskets + 1).map(|v| v.max(0) as u64).collect();
    match basket_entry.len() {
        0 => basket_entry.push(0),
        len if len <= n_baskets => basket_entry.push(entries),
        _ => {}
    }

    let mut recovered = Vec::new();
    let mut covered = basket_entry.last().copied().unwrap_or(0);
    if covered != entries && !embedded.is_empty() {
        for basket in embedded {
            covered += basket.n_entries as u64;
            basket_entry.push(covered);
            recovered.push(basket);
        }
        log::debug!("branch '{}': recovered {} baskets from the tree", name, recovered.len());
        if covered != entries {
            log::warn!(
                "branch '{}': recovered baskets cover {} entries, expected {}",
                name, covered, entries
            );
        }
    }

    r.set_pos(branch_end); // fFileName

    let mut out = Vec::with_capacity(sub_branches.len() + 1);
    let leaf = leaf.or_else(|| leaf_from_title(&title));
    match leaf {
        Some(leaf) => out.push(BranchInfo {
            name,
            title,
            leaf_type: leaf.leaf_type,
            leaf_len: leaf.len,
            entry_offset_len,
            entries,
            basket_bytes,
            basket_entry,
            basket_seek,
            n_baskets,
            recovered,
        }),
        None if sub_branches.is_empty() => {
            return Err(RootError::UnsupportedClass(format!("branch '{}' has no known leaf", name)));
        }
        None => {}
    }
    out.extend(sub_branches);
    Ok(out)
}

/// Read a TBranchElement: its own version header around a TBranch base.
fn read_tbranch_element(r: &mut RBuffer, refs: &mut ClassRefs) -> Result<Vec<BranchInfo>> {
    let (_ver, end) = r.read_version()?;
    end.ok_or_else(|| RootError::Deserialization("TBranchElement missing byte count".into()))?;
    // fClassName, fParentName, fID, fType, ... follow the base; the caller
    // skips them via the element's byte count.
    read_tbranch(r, refs)
}

// ── TLeaf parsing ──────────────────────────────────────────────

/// Type and element count of a branch's first leaf.
#[derive(Debug, Clone, Copy)]
struct LeafDesc {
    leaf_type: LeafType,
    len: usize,
}

/// Read a TObjArray of TLeaf objects and describe the first recognised one.
fn read_leaf_array(r: &mut RBuffer, refs: &mut ClassRefs) -> Result<Option<LeafDesc>> {
    let (count, arr_end) = read_objarray_header(r)?;

    let mut first = None;
    for _ in 0..count {
        let (class_name, end) = match refs.read_element(r)? {
            Element::Null | Element::Ref => continue,
            Element::Object { class_name, end } => (class_name, end),
        };
        match read_tleaf(r, refs, &class_name) {
            Ok(desc) if first.is_none() => first = desc,
            Ok(_) => {}
            Err(e) => log::debug!("skipping leaf ({}): {}", class_name, e),
        }
        r.set_pos(end);
    }

    r.set_pos(arr_end);
    Ok(first)
}

/// Read one `TLeaf*` object body.
fn read_tleaf(r: &mut RBuffer, refs: &mut ClassRefs, class_name: &str) -> Result<Option<LeafDesc>> {
    let (_ver, _end) = r.read_version()?; // TLeafX
    let (_ver, leaf_end) = r.read_version()?; // TLeaf base

    let (_name, _title) = r.read_tnamed()?;
    let len = r.read_i32()?.max(1) as usize; // fLen
    let _len_type = r.read_i32()?;
    let _offset = r.read_i32()?;
    let _is_range = r.read_u8()?;
    let is_unsigned = r.read_u8()? != 0;

    // fLeafCount: may introduce a class that later leaves refer to.
    if let Element::Object { end, .. } = refs.read_element(r)? {
        r.set_pos(end);
    }
    if let Some(end) = leaf_end {
        r.set_pos(end);
    }

    let leaf_type = if class_name == "TLeafElement" {
        let _id = r.read_i32()?;
        leaf_type_from_code(r.read_i32()?)
    } else {
        leaf_type_from_class(class_name)
    };

    Ok(leaf_type.map(|t| LeafDesc {
        leaf_type: if is_unsigned { t.to_unsigned() } else { t },
        len,
    }))
}

/// Map a TLeaf class name to a `LeafType`.
fn leaf_type_from_class(class_name: &str) -> Option<LeafType> {
    match class_name {
        "TLeafF" => Some(LeafType::F32),
        "TLeafD" => Some(LeafType::F64),
        "TLeafI" => Some(LeafType::I32),
        "TLeafL" => Some(LeafType::I64),
        "TLeafS" => Some(LeafType::I16),
        "TLeafB" => Some(LeafType::I8),
        "TLeafO" => Some(LeafType::Bool),
        _ => None,
    }
}

/// Map a `TLeafElement::fType` (TStreamerInfo basic type code) to a `LeafType`.
fn leaf_type_from_code(code: i32) -> Option<LeafType> {
    match code {
        1 => Some(LeafType::I8),
        2 => Some(LeafType::I16),
        3 | 6 => Some(LeafType::I32),
        4 | 16 => Some(LeafType::I64),
        5 => Some(LeafType::F32),
        8 => Some(LeafType::F64),
        11 => Some(LeafType::U8),
        12 => Some(LeafType::U16),
        13 => Some(LeafType::U32),
        14 | 17 => Some(LeafType::U64),
        18 => Some(LeafType::Bool),
        _ => None,
    }
}

/// Fallback: derive the leaf from a leaflist title such as `px/F`.
fn leaf_from_title(title: &str) -> Option<LeafDesc> {
    let (_, code) = title.rsplit_once('/')?;
    let leaf_type = match code {
        "F" => LeafType::F32,
        "D" => LeafType::F64,
        "I" => LeafType::I32,
        "i" => LeafType::U32,
        "L" => LeafType::I64,
        "l" => LeafType::U64,
        "S" => LeafType::I16,
        "s" => LeafType::U16,
        "B" => LeafType::I8,
        "b" => LeafType::U8,
        "O" => LeafType::Bool,
        _ => return None,
    };
    Some(LeafDesc { leaf_type, len: 1 })
}

// ── Basic arrays ───────────────────────────────────────────────

/// Pointer-to-array members are written as a flag byte followed by the
/// array itself when the flag is non-zero.
fn read_i32_array(r: &mut RBuffer, n: usize) -> Result<Vec<i32>> {
    if r.read_u8()? == 0 {
        return Ok(vec![0; n]);
    }
    (0..n).map(|_| r.read_i32()).collect()
}

fn read_i64_array(r: &mut RBuffer, n: usize) -> Result<Vec<i64>> {
    if r.read_u8()? == 0 {
        return Ok(vec![0; n]);
    }
    (0..n).map(|_| r.read_i64()).collect()
}
