//! TFile header parsing and top-level ROOT file interface.

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::branch_reader::BranchReader;
use crate::decompress::decompress;
use crate::directory::{Directory, DirectoryRecord};
use crate::error::{Result, RootError};
use crate::key::{Key, KeyInfo};
use crate::objects;
use crate::rbuffer::RBuffer;
use crate::scanner::Scanner;
use crate::tree::Tree;

const ROOT_MAGIC: &[u8; 4] = b"root";

/// File versions at or above this use 64-bit seek pointers in the header.
const LARGE_FILE_VERSION: u32 = 1_000_000;

/// Smallest file that can hold a complete header.
const MIN_FILE_LEN: usize = 64;

/// Backing storage for a ROOT file.
///
/// `Mmap` avoids copying multi-GB ntuple files into RAM;
/// `Owned` is used for `from_bytes()` and testing.
enum Backing {
    Owned(Vec<u8>),
    Mmap(memmap2::Mmap),
}

impl Deref for Backing {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v,
            Backing::Mmap(m) => m,
        }
    }
}

/// Parsed ROOT file header.
#[derive(Debug, Clone)]
struct FileHeader {
    /// Format version with the large-file offset removed (e.g. 62206).
    version: u32,
    /// Offset of first data record (also where top-level TKey sits).
    begin: u64,
    /// Offset of the first free byte at the end of the file.
    end: u64,
    /// Whether the file uses large (64-bit) seek pointers.
    is_large: bool,
    /// Default compression setting (`algorithm * 100 + level`).
    compression: u32,
    /// File name stored in the top-level key.
    name: String,
    /// Offset where top-level directory keys are stored.
    seek_keys: u64,
}

/// An object retrieved by name, tagged by kind.
#[derive(Debug, Clone)]
pub enum Object {
    /// A TTree (or TNtuple).
    Tree(Tree),
    /// A subdirectory.
    Directory(Directory),
    /// Any other class; not deserialized.
    Other {
        /// Object name.
        name: String,
        /// Class name stored in its key.
        class_name: String,
    },
}

impl Object {
    /// Class name of the object (`"TTree"` for any tree kind).
    pub fn class_name(&self) -> &str {
        match self {
            Object::Tree(_) => "TTree",
            Object::Directory(_) => "TDirectoryFile",
            Object::Other { class_name, .. } => class_name,
        }
    }

    /// Checked downcast to a tree.
    pub fn into_tree(self) -> Result<Tree> {
        match self {
            Object::Tree(tree) => Ok(tree),
            Object::Directory(dir) => Err(RootError::NotATree {
                name: dir.name().to_string(),
                class_name: "TDirectoryFile".into(),
            }),
            Object::Other { name, class_name } => Err(RootError::NotATree { name, class_name }),
        }
    }
}

/// A ROOT file opened for reading trees.
pub struct RootFile {
    data: Backing,
    header: FileHeader,
    path: PathBuf,
}

impl RootFile {
    /// Open and parse a ROOT file from disk using memory mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::File::open(&path)?;
        // SAFETY: the mapping is read-only; concurrent truncation of the file by
        // another process is outside what this reader guards against.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Self::from_backing(Backing::Mmap(mmap), path)
    }

    /// Parse a ROOT file from a byte vector.
    pub fn from_bytes(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        Self::from_backing(Backing::Owned(data), path)
    }

    fn from_backing(data: Backing, path: PathBuf) -> Result<Self> {
        if data.len() < MIN_FILE_LEN || &data[0..4] != ROOT_MAGIC {
            return Err(RootError::BadMagic);
        }

        let header = Self::parse_header(&data)?;
        log::debug!(
            "opened {} (version {}, {} bytes, large={}, compression={})",
            path.display(),
            header.version,
            data.len(),
            header.is_large,
            header.compression
        );
        Ok(Self { data, header, path })
    }

    /// Parse the file-level header and the embedded top TDirectory.
    ///
    /// ROOT file header layout (small file, version < 1000000):
    /// ```text
    /// offset  size  field
    ///    0      4   magic "root"
    ///    4      4   fVersion
    ///    8      4   fBEGIN
    ///   12      4   fEND
    ///   16      4   fSeekFree
    ///   20      4   fNbytesFree
    ///   24      4   nfree
    ///   28      4   fNbytesName
    ///   32      1   fUnits
    ///   33      4   fCompress
    ///   37      4   fSeekInfo
    ///   41      4   fNbytesInfo
    ///   45     18   fUUID
    /// ```
    /// Large files widen fEND, fSeekFree and fSeekInfo to 8 bytes.
    ///
    /// The TDirectory streamer is located at `fBEGIN + fNbytesName`.
    fn parse_header(data: &[u8]) -> Result<FileHeader> {
        let mut r = RBuffer::at(data, 4);

        let raw_version = r.read_u32()?;
        let is_large = raw_version >= LARGE_FILE_VERSION;
        let version = raw_version % LARGE_FILE_VERSION;

        let begin = r.read_u32()? as u64;
        let end = if is_large {
            let end = r.read_u64()?;
            let _seek_free = r.read_u64()?;
            end
        } else {
            let end = r.read_u32()? as u64;
            let _seek_free = r.read_u32()?;
            end
        };
        let _nbytes_free = r.read_u32()?;
        let _nfree = r.read_u32()?;
        let nbytes_name = r.read_u32()?;
        let _units = r.read_u8()?;
        let compression = r.read_u32()?;
        // fSeekInfo, fNbytesInfo and the UUID are not needed.

        if !(10..=10_000).contains(&nbytes_name) {
            return Err(RootError::Deserialization(format!(
                "implausible directory name record length {}",
                nbytes_name
            )));
        }

        let begin_pos = begin as usize;
        if begin_pos >= data.len() {
            return Err(RootError::Deserialization("fBEGIN past end of file".into()));
        }
        let top_key = Key::read(&mut RBuffer::at(data, begin_pos))?;

        let dir_offset = begin_pos + nbytes_name as usize;
        if dir_offset >= data.len() {
            return Err(RootError::Deserialization("TDirectory offset past end of file".into()));
        }
        let record = DirectoryRecord::read(&mut RBuffer::at(data, dir_offset))?;

        Ok(FileHeader {
            version,
            begin,
            end,
            is_large,
            compression,
            name: top_key.name,
            seek_keys: record.seek_keys,
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ROOT format version (e.g. 62206 for ROOT 6.22/06).
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Offset of the first data record.
    pub fn begin(&self) -> u64 {
        self.header.begin
    }

    /// Logical end of file recorded in the header.
    pub fn end(&self) -> u64 {
        self.header.end
    }

    /// Default compression setting recorded in the header.
    pub fn compression(&self) -> u32 {
        self.header.compression
    }

    /// Access the raw file data.
    pub fn file_data(&self) -> &[u8] {
        &self.data
    }

    /// Whether file uses 64-bit seek pointers.
    pub fn is_large(&self) -> bool {
        self.header.is_large
    }

    /// List all keys in the top-level directory.
    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        Ok(self.read_top_directory()?.key_infos())
    }

    fn read_top_directory(&self) -> Result<Directory> {
        Directory::read_key_list(&self.data, &self.header.name, self.header.seek_keys)
    }

    fn read_subdirectory(&self, key: &Key) -> Result<Directory> {
        let payload = self.read_key_payload(key)?;
        Directory::read_from_payload(&payload, key, &self.data)
    }

    /// Resolve a slash-separated path to the key of its final component.
    fn resolve_key(&self, path: &str) -> Result<Key> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, dirs)) = parts.split_last() else {
            return Err(RootError::KeyNotFound(path.to_string()));
        };

        let mut current = self.read_top_directory()?;
        for &part in dirs {
            let key = current
                .find_key(part)
                .ok_or_else(|| RootError::KeyNotFound(format!("{} (in path {})", part, path)))?;
            if !key.is_directory() {
                return Err(RootError::Deserialization(format!(
                    "'{}' is not a directory (class: {})",
                    part, key.class_name
                )));
            }
            current = self.read_subdirectory(key)?;
        }

        current.find_key(last).cloned().ok_or_else(|| RootError::KeyNotFound(path.to_string()))
    }

    /// Retrieve an object by path (`"tree"` or `"dir/sub/tree"`).
    pub fn get(&self, path: &str) -> Result<Object> {
        let key = self.resolve_key(path)?;
        if objects::is_tree_class(&key.class_name) {
            let payload = self.read_key_payload(&key)?;
            let tree = objects::read_tree(&payload, &key.class_name, key.key_len as usize)?;
            return Ok(Object::Tree(tree));
        }
        if key.is_directory() {
            return Ok(Object::Directory(self.read_subdirectory(&key)?));
        }
        Ok(Object::Other { name: key.name, class_name: key.class_name })
    }

    /// Read a TTree by path.
    pub fn get_tree(&self, path: &str) -> Result<Tree> {
        match self.get(path) {
            Err(RootError::KeyNotFound(_)) => Err(RootError::TreeNotFound(path.to_string())),
            other => other?.into_tree(),
        }
    }

    /// Read and decompress the payload of a TKey.
    pub fn read_key_payload(&self, key: &Key) -> Result<Vec<u8>> {
        let seek = usize::try_from(key.seek_key).map_err(|_| {
            RootError::Deserialization(format!("seek offset too large: {}", key.seek_key))
        })?;
        let end = seek.checked_add(key.n_bytes as usize).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(RootError::BufferUnderflow {
                offset: seek,
                need: key.n_bytes as usize,
                have: self.data.len().saturating_sub(seek),
            });
        };

        let stored = &self.data[seek + key.key_len as usize..end];
        if key.is_compressed() {
            decompress(stored, key.obj_len as usize)
        } else {
            Ok(stored.to_vec())
        }
    }

    /// Create a [`BranchReader`] for the named branch.
    pub fn branch_reader<'a>(&'a self, tree: &'a Tree, branch: &str) -> Result<BranchReader<'a>> {
        let info = tree
            .find_branch(branch)
            .ok_or_else(|| RootError::BranchNotFound(branch.to_string()))?;
        Ok(BranchReader::new(&self.data, info))
    }

    /// Convenience: read all entries from a branch as `f64`.
    pub fn branch_data(&self, tree: &Tree, branch: &str) -> Result<Vec<f64>> {
        self.branch_reader(tree, branch)?.as_f64()
    }

    /// Create a [`Scanner`] bound to the named branches.
    pub fn scanner<'a>(&'a self, tree: &'a Tree, branches: &[&str]) -> Result<Scanner<'a>> {
        Scanner::new(&self.data, tree, branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_non_root_file() {
        let result = RootFile::from_bytes(vec![0u8; 100], PathBuf::from("test.root"));
        assert!(matches!(result, Err(RootError::BadMagic)));
    }

    #[test]
    fn reject_truncated_file() {
        let result = RootFile::from_bytes(b"root".to_vec(), PathBuf::from("short.root"));
        assert!(matches!(result, Err(RootError::BadMagic)));
    }

    #[test]
    fn reject_garbage_header() {
        let mut data = vec![0u8; 200];
        data[..4].copy_from_slice(ROOT_MAGIC);
        let result = RootFile::from_bytes(data, PathBuf::from("zero.root"));
        assert!(matches!(result, Err(RootError::Deserialization(_))), "{:?}", result.err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = RootFile::open("/definitely/not/here.root");
        assert!(matches!(result, Err(RootError::Io(_))));
    }

    #[test]
    fn object_downcast() {
        let other = Object::Other { name: "h".into(), class_name: "TH1F".into() };
        assert_eq!(other.class_name(), "TH1F");
        match other.into_tree() {
            Err(RootError::NotATree { name, class_name }) => {
                assert_eq!(name, "h");
                assert_eq!(class_name, "TH1F");
            }
            other => panic!("expected NotATree, got {other:?}"),
        }
    }
}
