//! ROOT object deserialization dispatch.

mod ttree;

use crate::error::{Result, RootError};
use crate::tree::Tree;

/// Whether objects of `class_name` deserialize into a [`Tree`].
pub fn is_tree_class(class_name: &str) -> bool {
    matches!(class_name, "TTree" | "TNtuple" | "TNtupleD")
}

/// Read a tree from a decompressed object payload, given its class name and
/// the length of the key header stored in front of it.
pub fn read_tree(payload: &[u8], class_name: &str, key_len: usize) -> Result<Tree> {
    match class_name {
        "TTree" => ttree::read_ttree(payload, key_len),
        "TNtuple" | "TNtupleD" => ttree::read_tntuple(payload, key_len),
        _ => Err(RootError::UnsupportedClass(class_name.to_string())),
    }
}
