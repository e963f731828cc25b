//! TKey parsing: the record header ROOT uses to locate objects.

use crate::error::{Result, RootError};
use crate::rbuffer::RBuffer;

/// Key versions above this use 64-bit seek pointers.
const LARGE_KEY_VERSION: u16 = 1000;

/// A parsed TKey record.
#[derive(Debug, Clone)]
pub struct Key {
    /// Total number of bytes in compressed object + key header.
    pub n_bytes: u32,
    /// Version of key class.
    pub version: u16,
    /// Uncompressed object length.
    pub obj_len: u32,
    /// Key creation time (packed ROOT TDatime).
    pub datime: u32,
    /// Length of the key header itself.
    pub key_len: u16,
    /// Cycle number (ROOT versioning within a directory).
    pub cycle: u16,
    /// Absolute position of this key in the file.
    pub seek_key: u64,
    /// Parent directory seek position.
    pub seek_pdir: u64,
    /// Class name of the stored object.
    pub class_name: String,
    /// Object name.
    pub name: String,
    /// Object title.
    pub title: String,
}

/// Public info about a key (for `list_keys()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Object name.
    pub name: String,
    /// Object class name (e.g. "TTree", "TDirectoryFile").
    pub class_name: String,
    /// Object title.
    pub title: String,
    /// Cycle number.
    pub cycle: u16,
}

impl From<&Key> for KeyInfo {
    fn from(key: &Key) -> Self {
        Self {
            name: key.name.clone(),
            class_name: key.class_name.clone(),
            title: key.title.clone(),
            cycle: key.cycle,
        }
    }
}

impl Key {
    /// Read a TKey from the buffer at the current position.
    ///
    /// Seek fields are 64-bit only when the key's own version says so: keys
    /// written before a file grew past 2 GB keep 32-bit seeks.
    pub fn read(r: &mut RBuffer) -> Result<Self> {
        let n_bytes = r.read_u32()?;
        let version = r.read_u16()?;
        let obj_len = r.read_u32()?;
        let datime = r.read_u32()?;
        let key_len = r.read_u16()?;
        let cycle = r.read_u16()?;

        let (seek_key, seek_pdir) = if version > LARGE_KEY_VERSION {
            (r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64)
        };

        let class_name = r.read_string()?;
        let name = r.read_string()?;
        let title = r.read_string()?;

        if (key_len as u32) > n_bytes {
            return Err(RootError::Deserialization(format!(
                "key '{}' header length {} exceeds record length {}",
                name, key_len, n_bytes
            )));
        }

        Ok(Key {
            n_bytes,
            version,
            obj_len,
            datime,
            key_len,
            cycle,
            seek_key,
            seek_pdir,
            class_name,
            name,
            title,
        })
    }

    /// Bytes of object data stored after the key header.
    #[inline]
    pub fn stored_len(&self) -> usize {
        self.n_bytes as usize - self.key_len as usize
    }

    /// Whether the stored object bytes are compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.obj_len as usize != self.stored_len()
    }

    /// Whether this key refers to a subdirectory.
    pub fn is_directory(&self) -> bool {
        matches!(self.class_name.as_str(), "TDirectoryFile" | "TDirectory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.push(s.len() as u8);
        buf.extend_from_slice(s.as_bytes());
    }

    fn key_bytes(version: u16, n_bytes: u32, obj_len: u32, key_len: u16) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&n_bytes.to_be_bytes());
        b.extend_from_slice(&version.to_be_bytes());
        b.extend_from_slice(&obj_len.to_be_bytes());
        b.extend_from_slice(&0u32.to_be_bytes());
        b.extend_from_slice(&key_len.to_be_bytes());
        b.extend_from_slice(&3u16.to_be_bytes());
        if version > LARGE_KEY_VERSION {
            b.extend_from_slice(&3_000_000_000u64.to_be_bytes());
            b.extend_from_slice(&100u64.to_be_bytes());
        } else {
            b.extend_from_slice(&100u32.to_be_bytes());
            b.extend_from_slice(&100u32.to_be_bytes());
        }
        push_string(&mut b, "TTree");
        push_string(&mut b, "twoMuon");
        push_string(&mut b, "muon pairs");
        b
    }

    fn small_key_bytes(n_bytes: u32, obj_len: u32, key_len: u16) -> Vec<u8> {
        key_bytes(4, n_bytes, obj_len, key_len)
    }

    #[test]
    fn read_small_key() {
        let data = small_key_bytes(200, 180, 50);
        let key = Key::read(&mut RBuffer::new(&data)).unwrap();
        assert_eq!(key.class_name, "TTree");
        assert_eq!(key.name, "twoMuon");
        assert_eq!(key.title, "muon pairs");
        assert_eq!(key.cycle, 3);
        assert_eq!(key.seek_key, 100);
        assert_eq!(key.stored_len(), 150);
        assert!(key.is_compressed());
        assert!(!key.is_directory());

        let info = KeyInfo::from(&key);
        assert_eq!(info.name, "twoMuon");
        assert_eq!(info.cycle, 3);
    }

    #[test]
    fn uncompressed_when_lengths_match() {
        let data = small_key_bytes(200, 150, 50);
        let key = Key::read(&mut RBuffer::new(&data)).unwrap();
        assert!(!key.is_compressed());
    }

    #[test]
    fn header_longer_than_record_is_rejected() {
        let data = small_key_bytes(20, 0, 50);
        assert!(Key::read(&mut RBuffer::new(&data)).is_err());
    }

    #[test]
    fn seek_width_follows_key_version() {
        let data = key_bytes(1004, 200, 150, 58);
        let key = Key::read(&mut RBuffer::new(&data)).unwrap();
        assert_eq!(key.seek_key, 3_000_000_000);
        assert_eq!(key.seek_pdir, 100);
        assert_eq!(key.name, "twoMuon");

        // A version-4 key keeps 32-bit seeks even inside a large file.
        let data = small_key_bytes(200, 150, 50);
        let mut r = RBuffer::new(&data);
        let key = Key::read(&mut r).unwrap();
        assert_eq!(key.seek_key, 100);
        assert_eq!(key.title, "muon pairs");
        assert_eq!(r.pos(), data.len());
    }
}
