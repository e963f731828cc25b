//! TDirectory parsing and key-list navigation.

use crate::error::{Result, RootError};
use crate::key::{Key, KeyInfo};
use crate::rbuffer::RBuffer;

/// Directory versions above this use 64-bit seek pointers.
const LARGE_DIR_VERSION: u16 = 1000;

/// The fixed part of a TDirectory streamer record.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryRecord {
    /// Streamer version (`> 1000` means 64-bit seeks).
    pub version: u16,
    /// Size of the key list record.
    pub nbytes_keys: u32,
    /// Size of the directory's name record.
    pub nbytes_name: u32,
    /// Position of the directory's own key.
    pub seek_dir: u64,
    /// Position of the parent directory.
    pub seek_parent: u64,
    /// Position of the key list.
    pub seek_keys: u64,
}

impl DirectoryRecord {
    /// Read a TDirectory streamer at the reader's current position.
    pub fn read(r: &mut RBuffer) -> Result<Self> {
        let version = r.read_u16()?;
        let _datime_c = r.read_u32()?;
        let _datime_m = r.read_u32()?;
        let nbytes_keys = r.read_u32()?;
        let nbytes_name = r.read_u32()?;

        let (seek_dir, seek_parent, seek_keys) = if version > LARGE_DIR_VERSION {
            (r.read_u64()?, r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64, r.read_u32()? as u64)
        };

        Ok(Self { version, nbytes_keys, nbytes_name, seek_dir, seek_parent, seek_keys })
    }
}

/// A parsed TDirectory: an ordered list of TKeys.
#[derive(Debug, Clone)]
pub struct Directory {
    name: String,
    keys: Vec<Key>,
}

impl Directory {
    /// Read the key list from the file at `seek_keys`.
    ///
    /// The key list starts with a TKey header for the list itself, then
    /// a u32 `nkeys`, followed by `nkeys` TKey records.
    pub fn read_key_list(file_data: &[u8], name: &str, seek_keys: u64) -> Result<Self> {
        let pos = usize::try_from(seek_keys).map_err(|_| {
            RootError::Deserialization(format!("key list offset too large: {}", seek_keys))
        })?;
        if pos >= file_data.len() {
            return Err(RootError::Deserialization(format!(
                "key list offset {} past end of file ({} bytes)",
                pos,
                file_data.len()
            )));
        }
        let mut r = RBuffer::at(file_data, pos);

        let _list_key = Key::read(&mut r)?;
        let nkeys = r.read_i32()?;
        if nkeys < 0 {
            return Err(RootError::Deserialization(format!("negative key count {}", nkeys)));
        }

        let mut keys = Vec::with_capacity((nkeys as usize).min(r.remaining() / 26));
        for _ in 0..nkeys {
            keys.push(Key::read(&mut r)?);
        }
        log::debug!("directory '{}': {} keys at {}", name, keys.len(), pos);

        Ok(Directory { name: name.to_string(), keys })
    }

    /// Read a directory from the decompressed payload of a TDirectoryFile key.
    ///
    /// The payload starts with a TDirectory streamer that contains
    /// `seek_keys` for the subdirectory's key list.
    pub fn read_from_payload(payload: &[u8], dir_key: &Key, file_data: &[u8]) -> Result<Self> {
        let record = DirectoryRecord::read(&mut RBuffer::new(payload))?;
        if record.seek_keys == 0 {
            return Ok(Directory { name: dir_key.name.clone(), keys: Vec::new() });
        }
        Self::read_key_list(file_data, &dir_key.name, record.seek_keys)
    }

    /// Directory name (file name for the top directory).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public key summaries, in storage order.
    pub fn key_infos(&self) -> Vec<KeyInfo> {
        self.keys.iter().map(KeyInfo::from).collect()
    }

    /// Find a key by name (returns the highest cycle).
    pub fn find_key(&self, name: &str) -> Option<&Key> {
        self.keys.iter().filter(|k| k.name == name).max_by_key(|k| k.cycle)
    }
}
