//! Basket (compressed data block) reading for TTree branches.

use crate::decompress::decompress;
use crate::error::{Result, RootError};
use crate::key::Key;
use crate::rbuffer::RBuffer;
use crate::tree::BranchInfo;

/// TBasket fields stored at the end of a basket's key header:
/// version, fBufferSize, fNevBufSize, fNevBuf, fLast and a flag byte.
const BASKET_HEADER_LEN: usize = 19;
/// Smallest TKey header: fixed fields plus three empty strings.
const MIN_KEY_LEN: usize = 29;

/// A decompressed TBasket.
#[derive(Debug, Clone)]
pub struct Basket {
    /// Number of entries stored in this basket (`fNevBuf`).
    pub n_entries: usize,
    /// Decompressed payload following the key header.
    payload: Vec<u8>,
    /// End of the value region inside `payload` (entry offsets follow it).
    border: usize,
}

impl Basket {
    /// Big-endian value bytes, without the trailing entry-offset table.
    pub fn values(&self) -> &[u8] {
        &self.payload[..self.border]
    }
}

/// Read and decompress a single basket from the file.
pub fn read_basket(file_data: &[u8], seek: u64) -> Result<Basket> {
    let pos = usize::try_from(seek)
        .map_err(|_| RootError::Deserialization(format!("basket seek too large: {}", seek)))?;
    if pos >= file_data.len() {
        return Err(RootError::BufferUnderflow { offset: pos, need: 1, have: 0 });
    }

    let mut r = RBuffer::at(file_data, pos);
    let key = Key::read(&mut r)?;

    // TBasket header fields follow the generic TKey header.
    let _version = r.read_i16()?;
    let _buffer_size = r.read_i32()?;
    let _nev_buf_size = r.read_i32()?;
    let nev_buf = r.read_i32()?;
    let last = r.read_i32()?;
    let _flag = r.read_u8()?;

    let key_end = pos + key.n_bytes as usize;
    if key_end > file_data.len() {
        return Err(RootError::BufferUnderflow {
            offset: pos,
            need: key.n_bytes as usize,
            have: file_data.len() - pos,
        });
    }

    let stored = &file_data[pos + key.key_len as usize..key_end];
    let payload =
        if key.is_compressed() { decompress(stored, key.obj_len as usize)? } else { stored.to_vec() };

    if last < key.key_len as i32 {
        return Err(RootError::Deserialization(format!(
            "basket at {} has fLast {} inside its key header ({} bytes)",
            pos, last, key.key_len
        )));
    }
    let border = (last as usize - key.key_len as usize).min(payload.len());

    Ok(Basket { n_entries: nev_buf.max(0) as usize, payload, border })
}

/// Read a TBasket streamed inside its TBranch (`fBaskets`).
///
/// Trees whose file was not closed keep their last basket in memory; ROOT
/// then writes it into the tree metadata instead of its own key. The buffer
/// is stored uncompressed and starts with a copy of the key header.
pub(crate) fn read_embedded_basket(r: &mut RBuffer) -> Result<Basket> {
    let start = r.pos();
    let _n_bytes = r.read_i32()?;
    let _key_version = r.read_i16()?;
    let _obj_len = r.read_i32()?;
    let _datime = r.read_u32()?;
    let key_len = r.read_i16()?.max(0) as usize;
    if key_len < MIN_KEY_LEN + BASKET_HEADER_LEN {
        return Err(RootError::Deserialization(format!(
            "embedded basket at {} has a {}-byte key header",
            start, key_len
        )));
    }

    // Class name, name and title are not needed: jump to the TBasket fields.
    r.set_pos(start + key_len - BASKET_HEADER_LEN);
    let _version = r.read_u16()?;
    let _buffer_size = r.read_i32()?;
    let _nev_buf_size = r.read_i32()?;
    let nev_buf = r.read_i32()?;
    let last = r.read_i32()?.max(0) as usize;
    let flag = r.read_u8()?;

    if flag % 10 != 2 {
        if nev_buf > 0 {
            skip_i32_array(r)?; // fEntryOffset
        }
        if 20 < flag && flag < 40 {
            skip_i32_array(r)?; // fDisplacement
        }
    }
    if !(flag == 1 || flag > 10) {
        return Err(RootError::Deserialization(format!(
            "embedded basket at {} carries no buffer (flag {})",
            start, flag
        )));
    }
    if last < key_len {
        return Err(RootError::Deserialization(format!(
            "embedded basket at {} has fLast {} inside its key header ({} bytes)",
            start, last, key_len
        )));
    }

    let buffer = r.read_bytes(last)?;
    let payload = buffer[key_len..].to_vec();
    let border = payload.len();
    Ok(Basket { n_entries: nev_buf.max(0) as usize, payload, border })
}

fn skip_i32_array(r: &mut RBuffer) -> Result<()> {
    let n = r.read_i32()?.max(0) as usize;
    r.skip(n * 4)
}

/// Load basket `i` of `branch`, from its own key or from the baskets
/// recovered out of the tree metadata, and check it holds the entries its
/// range claims.
pub fn load_basket(file_data: &[u8], branch: &BranchInfo, i: usize) -> Result<Basket> {
    let basket = if i < branch.n_baskets {
        read_basket(file_data, branch.basket_seek[i])?
    } else {
        branch.recovered.get(i - branch.n_baskets).cloned().ok_or_else(|| {
            RootError::Deserialization(format!(
                "branch '{}' has no basket {} ({} baskets)",
                branch.name,
                i,
                branch.basket_count()
            ))
        })?
    };

    let (first, end) = branch.basket_range(i);
    if (basket.n_entries as u64) < end - first {
        return Err(RootError::Deserialization(format!(
            "branch '{}' basket {}: fNevBuf {} for entry range [{}, {})",
            branch.name, i, basket.n_entries, first, end
        )));
    }
    Ok(basket)
}
