//! Minimal ROOT file writer for building test inputs.
//!
//! Produces files holding flat TTrees (or TNtuples) of scalar or fixed-array
//! numeric branches, optional subdirectories and opaque objects. Files use
//! 32-bit seeks unless [`FileBuilder::large`] is set. Branches are plain
//! `TBranch`es, or `TBranchElement`s split from one object branch. Only the
//! records this crate reads are written; the files are not meant to be
//! opened by ROOT itself.
//!
//! ```
//! use readsimple_root::fixture::{Column, FileBuilder, TreeSpec};
//!
//! let bytes = FileBuilder::new("muons.root")
//!     .tree(
//!         TreeSpec::new("twoMuon")
//!             .branch("px", Column::F32(vec![1.0, 2.0, 3.0]))
//!             .basket_entries(2),
//!     )
//!     .build();
//! assert_eq!(&bytes[..4], b"root");
//! ```

use std::io::Write;
use std::path::Path;

use crate::decompress::BLOCK_HEADER_LEN;
use crate::rbuffer::K_BYTE_COUNT_MASK;

/// Offset of the first record (`fBEGIN`).
const BEGIN: usize = 100;
/// Format version written to the header (ROOT 6.22/06).
const FILE_VERSION: u32 = 62206;
/// Added to the file version when the header holds 64-bit seeks.
const LARGE_FILE_OFFSET: u32 = 1_000_000;
/// Key class version with 32-bit seek fields.
const KEY_VERSION: u16 = 4;
/// TDirectory streamer version with 32-bit seek fields.
const DIR_VERSION: u16 = 5;
/// Added to key and directory versions whose seek fields are 64-bit.
const LARGE_VERSION_OFFSET: u16 = 1000;
/// Fixed part of a TKey header before its three strings.
const KEY_FIXED_LEN: usize = 26;
/// Fixed part of a TKey header with 64-bit seeks.
const LARGE_KEY_FIXED_LEN: usize = 34;
/// TBasket fields stored after the key strings.
const BASKET_HEADER_LEN: usize = 19;
/// TBasket flag of a streamed buffer without entry offsets.
const EMBEDDED_BASKET_FLAG: u8 = 12;
/// Largest chunk one compression block can describe (3-byte size fields).
const MAX_BLOCK_LEN: usize = 0xFF_FFFF;
/// A fixed TDatime (2020-06-15 12:00:00).
const DATIME: u32 = 0x6a9f_6000;

const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
const K_CLASS_MASK: u32 = 0x8000_0000;
const K_MAP_OFFSET: usize = 2;
/// `kNotDeleted | kIsOnHeap`, without `kIsReferenced`.
const TOBJECT_BITS: u32 = 0x0300_0000;

// ── Write buffer ───────────────────────────────────────────────

/// Big-endian output buffer with ROOT streamer helpers.
#[derive(Debug, Default)]
pub struct WBuffer {
    buf: Vec<u8>,
}

impl WBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    /// Consume the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Append a `u8`.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `i16`.
    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `f32`.
    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian `f64`.
    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a ROOT string (short or long length prefix).
    pub fn write_string(&mut self, s: &str) {
        if s.len() < 255 {
            self.write_u8(s.len() as u8);
        } else {
            self.write_u8(255);
            self.write_u32(s.len() as u32);
        }
        self.write_bytes(s.as_bytes());
    }

    /// Append a NUL-terminated string.
    pub fn write_cstring(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Start a versioned object: reserve its byte count and write `version`.
    /// Returns the position to hand to [`end_object`](Self::end_object).
    pub fn begin_object(&mut self, version: u16) -> usize {
        let start = self.pos();
        self.write_u32(0);
        self.write_u16(version);
        start
    }

    /// Patch the byte count of the object started at `start`.
    pub fn end_object(&mut self, start: usize) {
        let count = (self.pos() - start - 4) as u32 | K_BYTE_COUNT_MASK;
        self.buf[start..start + 4].copy_from_slice(&count.to_be_bytes());
    }

    /// Append a `TObject` header.
    pub fn write_tobject(&mut self) {
        self.write_u16(1);
        self.write_u32(0);
        self.write_u32(TOBJECT_BITS);
    }

    /// Append a `TNamed`.
    pub fn write_tnamed(&mut self, name: &str, title: &str) {
        let start = self.begin_object(1);
        self.write_tobject();
        self.write_string(name);
        self.write_string(title);
        self.end_object(start);
    }
}

/// Length of a ROOT string once written.
fn string_len(s: &str) -> usize {
    if s.len() < 255 { 1 + s.len() } else { 5 + s.len() }
}

/// Class tags written so far in one object stream.
struct ClassTags {
    displacement: usize,
    seen: Vec<(String, u32)>,
}

impl ClassTags {
    fn new(key_len: usize) -> Self {
        Self { displacement: key_len, seen: Vec::new() }
    }

    /// Write a non-null object element: byte count, class tag, then `body`.
    fn write_element(
        &mut self,
        w: &mut WBuffer,
        class_name: &str,
        body: impl FnOnce(&mut WBuffer, &mut Self),
    ) {
        let start = w.pos();
        w.write_u32(0);
        let tag_pos = w.pos();
        match self.seen.iter().find(|(c, _)| c == class_name) {
            Some(&(_, reference)) => w.write_u32(K_CLASS_MASK | reference),
            None => {
                w.write_u32(K_NEW_CLASS_TAG);
                w.write_cstring(class_name);
                let reference = (tag_pos + self.displacement + K_MAP_OFFSET) as u32;
                self.seen.push((class_name.to_string(), reference));
            }
        }
        body(w, self);
        w.end_object(start);
    }
}

// ── Keys and records ──────────────────────────────────────────

/// Length of a TKey header for `(class, name, title)`.
fn key_header_len(large: bool, (class_name, name, title): (&str, &str, &str)) -> usize {
    let fixed = if large { LARGE_KEY_FIXED_LEN } else { KEY_FIXED_LEN };
    fixed + string_len(class_name) + string_len(name) + string_len(title)
}

/// A TKey header; `large` selects version 1004 with 64-bit seeks.
struct KeyHeader<'a> {
    large: bool,
    n_bytes: u32,
    obj_len: u32,
    key_len: u16,
    cycle: u16,
    seek_key: u64,
    seek_pdir: u64,
    ids: (&'a str, &'a str, &'a str),
}

impl KeyHeader<'_> {
    fn write(&self, w: &mut WBuffer) {
        w.write_u32(self.n_bytes);
        w.write_u16(if self.large { KEY_VERSION + LARGE_VERSION_OFFSET } else { KEY_VERSION });
        w.write_u32(self.obj_len);
        w.write_u32(DATIME);
        w.write_u16(self.key_len);
        w.write_u16(self.cycle);
        if self.large {
            w.write_u64(self.seek_key);
            w.write_u64(self.seek_pdir);
        } else {
            w.write_u32(self.seek_key as u32);
            w.write_u32(self.seek_pdir as u32);
        }
        let (class_name, name, title) = self.ids;
        w.write_string(class_name);
        w.write_string(name);
        w.write_string(title);
    }
}

/// A basket's key header followed by its TBasket fields.
struct BasketHeader<'a> {
    key: KeyHeader<'a>,
    entry_size: usize,
    n_entries: usize,
    flag: u8,
}

impl BasketHeader<'_> {
    fn write(&self, w: &mut WBuffer) {
        self.key.write(w);
        w.write_i16(3); // fVersion
        w.write_i32(32000); // fBufferSize
        w.write_i32(self.entry_size as i32); // fNevBufSize
        w.write_i32(self.n_entries as i32); // fNevBuf
        w.write_i32((self.key.key_len as u32 + self.key.obj_len) as i32); // fLast
        w.write_u8(self.flag);
    }
}

/// A TDirectory record; `large` widens the three seeks to 64 bits.
fn write_dir_record(
    w: &mut WBuffer,
    large: bool,
    nbytes_keys: u32,
    nbytes_name: u32,
    seeks: [u64; 3],
) {
    w.write_u16(if large { DIR_VERSION + LARGE_VERSION_OFFSET } else { DIR_VERSION });
    w.write_u32(DATIME);
    w.write_u32(DATIME);
    w.write_u32(nbytes_keys);
    w.write_u32(nbytes_name);
    for seek in seeks {
        if large {
            w.write_u64(seek);
        } else {
            w.write_u32(seek as u32);
        }
    }
    w.write_bytes(&[0u8; 18]); // UUID
}

// ── Tree description ──────────────────────────────────────────

/// Values of one branch, flattened across entries.
#[derive(Debug, Clone)]
pub enum Column {
    /// `Float_t` (`TLeafF`).
    F32(Vec<f32>),
    /// `Double_t` (`TLeafD`).
    F64(Vec<f64>),
    /// `Int_t` (`TLeafI`).
    I32(Vec<i32>),
    /// `Long64_t` (`TLeafL`).
    I64(Vec<i64>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::F32(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::I64(v) => v.len(),
        }
    }

    fn elem_size(&self) -> usize {
        match self {
            Column::F32(_) | Column::I32(_) => 4,
            Column::F64(_) | Column::I64(_) => 8,
        }
    }

    fn leaf_class(&self) -> &'static str {
        match self {
            Column::F32(_) => "TLeafF",
            Column::F64(_) => "TLeafD",
            Column::I32(_) => "TLeafI",
            Column::I64(_) => "TLeafL",
        }
    }

    fn type_code(&self) -> char {
        match self {
            Column::F32(_) => 'F',
            Column::F64(_) => 'D',
            Column::I32(_) => 'I',
            Column::I64(_) => 'L',
        }
    }

    /// `TLeafElement::fType` (TStreamerInfo basic type).
    fn element_type(&self) -> i32 {
        match self {
            Column::F32(_) => 5,
            Column::F64(_) => 8,
            Column::I32(_) => 3,
            Column::I64(_) => 16,
        }
    }

    /// Big-endian bytes of elements `[from, to)`.
    fn encode(&self, from: usize, to: usize) -> Vec<u8> {
        let mut w = WBuffer::new();
        match self {
            Column::F32(v) => v[from..to].iter().for_each(|&x| w.write_f32(x)),
            Column::F64(v) => v[from..to].iter().for_each(|&x| w.write_f64(x)),
            Column::I32(v) => v[from..to].iter().for_each(|&x| w.write_i32(x)),
            Column::I64(v) => v[from..to].iter().for_each(|&x| w.write_i64(x)),
        }
        w.into_inner()
    }

    /// `fMinimum`/`fMaximum` of the matching `TLeaf*` class.
    fn write_range(&self, w: &mut WBuffer) {
        match self {
            Column::F32(_) => {
                w.write_f32(0.0);
                w.write_f32(0.0);
            }
            Column::F64(_) => {
                w.write_f64(0.0);
                w.write_f64(0.0);
            }
            Column::I32(_) => {
                w.write_i32(0);
                w.write_i32(0);
            }
            Column::I64(_) => {
                w.write_i64(0);
                w.write_i64(0);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct BranchSpec {
    name: String,
    len: usize,
    column: Column,
}

impl BranchSpec {
    fn entries(&self) -> usize {
        self.column.len() / self.len
    }

    fn title(&self) -> String {
        if self.len == 1 {
            format!("{}/{}", self.name, self.column.type_code())
        } else {
            format!("{}[{}]/{}", self.name, self.len, self.column.type_code())
        }
    }
}

/// A flat TTree to be written.
#[derive(Debug, Clone)]
pub struct TreeSpec {
    name: String,
    title: String,
    dir: Option<String>,
    cycle: u16,
    basket_entries: usize,
    ntuple: bool,
    split_object: Option<String>,
    unflushed: bool,
    branches: Vec<BranchSpec>,
}

impl TreeSpec {
    /// A tree named `name` with no branches.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: String::new(),
            dir: None,
            cycle: 1,
            basket_entries: 1000,
            ntuple: false,
            split_object: None,
            unflushed: false,
            branches: Vec::new(),
        }
    }

    /// Set the tree title.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Store the tree in subdirectory `dir` instead of the top directory.
    pub fn in_dir(mut self, dir: &str) -> Self {
        self.dir = Some(dir.to_string());
        self
    }

    /// Set the key cycle.
    pub fn cycle(mut self, cycle: u16) -> Self {
        self.cycle = cycle;
        self
    }

    /// Maximum entries per basket.
    pub fn basket_entries(mut self, n: usize) -> Self {
        self.basket_entries = n.max(1);
        self
    }

    /// Store the tree as a `TNtuple`.
    pub fn ntuple(mut self) -> Self {
        self.ntuple = true;
        self
    }

    /// Write every branch as a `TBranchElement` with a `TLeafElement`,
    /// split from one leafless object branch called `parent`.
    pub fn split_object(mut self, parent: &str) -> Self {
        self.split_object = Some(parent.to_string());
        self
    }

    /// Keep each branch's last basket inside the tree metadata instead of
    /// under its own key, as a writer that never closed the file leaves it.
    pub fn unflushed(mut self) -> Self {
        self.unflushed = true;
        self
    }

    /// Add a scalar branch with one value per entry.
    pub fn branch(self, name: &str, column: Column) -> Self {
        self.array_branch(name, 1, column)
    }

    /// Add a fixed-size array branch holding `len` values per entry.
    pub fn array_branch(mut self, name: &str, len: usize, column: Column) -> Self {
        self.branches.push(BranchSpec { name: name.to_string(), len: len.max(1), column });
        self
    }

    fn entries(&self) -> usize {
        self.branches.iter().map(BranchSpec::entries).min().unwrap_or(0)
    }

    fn class_name(&self) -> &'static str {
        if self.ntuple { "TNtuple" } else { "TTree" }
    }
}

/// Where one branch's baskets landed.
struct BasketLayout {
    bytes: Vec<i32>,
    entry: Vec<i64>,
    seek: Vec<i64>,
    tot_bytes: i64,
    zip_bytes: i64,
    /// Streamed TBasket holding the last basket, for unflushed trees.
    embedded: Option<Vec<u8>>,
}

// ── File builder ──────────────────────────────────────────────

/// Builder for a complete ROOT file image.
#[derive(Debug, Clone)]
pub struct FileBuilder {
    name: String,
    compress: bool,
    large: bool,
    trees: Vec<TreeSpec>,
    objects: Vec<(String, String)>,
    dirs: Vec<String>,
}

impl FileBuilder {
    /// Start a file whose top directory is called `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compress: false,
            large: false,
            trees: Vec::new(),
            objects: Vec::new(),
            dirs: Vec::new(),
        }
    }

    /// Compress baskets and object payloads with zlib.
    pub fn compressed(mut self, on: bool) -> Self {
        self.compress = on;
        self
    }

    /// Write the large format: 64-bit seeks in the header, the directory
    /// records and every object key. Basket keys keep 32-bit seeks, as for
    /// baskets written before a file grows past 2 GB.
    pub fn large(mut self, on: bool) -> Self {
        self.large = on;
        self
    }

    /// Add a tree.
    pub fn tree(mut self, tree: TreeSpec) -> Self {
        if let Some(dir) = &tree.dir {
            if !self.dirs.contains(dir) {
                self.dirs.push(dir.clone());
            }
        }
        self.trees.push(tree);
        self
    }

    /// Add a top-level `TObjString` named `name` holding `text`.
    pub fn object(mut self, name: &str, text: &str) -> Self {
        self.objects.push((name.to_string(), text.to_string()));
        self
    }

    /// Write the file image to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        f.write_all(&self.build())?;
        f.flush()
    }

    /// Assemble the file image.
    pub fn build(&self) -> Vec<u8> {
        let begin = BEGIN as u64;
        let mut out = vec![0u8; BEGIN];
        let top = self.top_record(0, 0);
        out.extend_from_slice(&top);

        let mut top_keys: Vec<Vec<u8>> = Vec::new();

        for dir in &self.dirs {
            // fSeekPdir of the directory contents is not read back; point it at the top.
            let mut dir_keys = Vec::new();
            for tree in self.trees.iter().filter(|t| t.dir.as_deref() == Some(dir.as_str())) {
                dir_keys.push(self.write_tree(&mut out, tree, begin));
            }
            let (seek_keys, nbytes_keys) = self.write_key_list(&mut out, dir, begin, &dir_keys);

            let mut rec = WBuffer::new();
            let dir_seek = out.len() as u64;
            write_dir_record(&mut rec, self.large, nbytes_keys, 0, [dir_seek, begin, seek_keys]);
            top_keys.push(self.write_record(
                &mut out,
                ("TDirectoryFile", dir, dir),
                1,
                begin,
                &rec.into_inner(),
                false,
            ));
        }

        for tree in self.trees.iter().filter(|t| t.dir.is_none()) {
            top_keys.push(self.write_tree(&mut out, tree, begin));
        }

        for (name, text) in &self.objects {
            let mut w = WBuffer::new();
            let start = w.begin_object(1);
            w.write_tobject();
            w.write_string(text);
            w.end_object(start);
            top_keys.push(self.write_record(
                &mut out,
                ("TObjString", name, "Collectable string class"),
                1,
                begin,
                &w.into_inner(),
                self.compress,
            ));
        }

        let (seek_keys, nbytes_keys) = self.write_key_list(&mut out, &self.name, begin, &top_keys);

        let top = self.top_record(nbytes_keys, seek_keys);
        out[BEGIN..BEGIN + top.len()].copy_from_slice(&top);

        let header = self.header(out.len() as u64, self.name_record_len() as u32);
        out[..header.len()].copy_from_slice(&header);
        out
    }

    fn header(&self, end: u64, nbytes_name: u32) -> Vec<u8> {
        let mut w = WBuffer::new();
        w.write_bytes(b"root");
        if self.large {
            w.write_u32(FILE_VERSION + LARGE_FILE_OFFSET);
            w.write_u32(BEGIN as u32);
            w.write_u64(end);
            w.write_u64(0); // fSeekFree
        } else {
            w.write_u32(FILE_VERSION);
            w.write_u32(BEGIN as u32);
            w.write_u32(end as u32);
            w.write_u32(0); // fSeekFree
        }
        w.write_u32(0); // fNbytesFree
        w.write_u32(0); // nfree
        w.write_u32(nbytes_name);
        w.write_u8(if self.large { 8 } else { 4 }); // fUnits
        w.write_u32(if self.compress { 101 } else { 0 });
        if self.large {
            w.write_u64(0); // fSeekInfo
        } else {
            w.write_u32(0); // fSeekInfo
        }
        w.write_u32(0); // fNbytesInfo
        w.write_bytes(&[0u8; 18]);
        w.into_inner()
    }

    fn top_ids(&self) -> (&str, &str, &str) {
        ("TFile", &self.name, "")
    }

    /// Key header plus name and title of the top directory.
    fn name_record_len(&self) -> usize {
        key_header_len(self.large, self.top_ids()) + string_len(&self.name) + string_len("")
    }

    /// The TFile key, its name record and the top TDirectory record.
    fn top_record(&self, nbytes_keys: u32, seek_keys: u64) -> Vec<u8> {
        let ids = self.top_ids();
        let key_len = key_header_len(self.large, ids);

        let mut body = WBuffer::new();
        body.write_string(&self.name);
        body.write_string("");
        write_dir_record(
            &mut body,
            self.large,
            nbytes_keys,
            self.name_record_len() as u32,
            [BEGIN as u64, 0, seek_keys],
        );
        let body = body.into_inner();

        let mut w = WBuffer::new();
        KeyHeader {
            large: self.large,
            n_bytes: (key_len + body.len()) as u32,
            obj_len: body.len() as u32,
            key_len: key_len as u16,
            cycle: 1,
            seek_key: BEGIN as u64,
            seek_pdir: 0,
            ids,
        }
        .write(&mut w);
        w.write_bytes(&body);
        w.into_inner()
    }

    /// Append a key list record; returns `(seek_keys, nbytes_keys)`.
    fn write_key_list(
        &self,
        out: &mut Vec<u8>,
        name: &str,
        seek_pdir: u64,
        keys: &[Vec<u8>],
    ) -> (u64, u32) {
        let mut body = WBuffer::new();
        body.write_i32(keys.len() as i32);
        for k in keys {
            body.write_bytes(k);
        }
        let body = body.into_inner();

        let ids = ("TDirectory", name, "");
        let key_len = key_header_len(self.large, ids);
        let seek = out.len() as u64;
        let n_bytes = (key_len + body.len()) as u32;
        let mut w = WBuffer::new();
        KeyHeader {
            large: self.large,
            n_bytes,
            obj_len: body.len() as u32,
            key_len: key_len as u16,
            cycle: 1,
            seek_key: seek,
            seek_pdir,
            ids,
        }
        .write(&mut w);
        w.write_bytes(&body);
        out.extend_from_slice(&w.into_inner());
        (seek, n_bytes)
    }

    /// Append a keyed object; returns its key header for the key list.
    fn write_record(
        &self,
        out: &mut Vec<u8>,
        ids: (&str, &str, &str),
        cycle: u16,
        seek_pdir: u64,
        data: &[u8],
        compress: bool,
    ) -> Vec<u8> {
        let key_len = key_header_len(self.large, ids);
        let stored = if compress { zlib_blocks(data) } else { data.to_vec() };

        let mut w = WBuffer::new();
        KeyHeader {
            large: self.large,
            n_bytes: (key_len + stored.len()) as u32,
            obj_len: data.len() as u32,
            key_len: key_len as u16,
            cycle,
            seek_key: out.len() as u64,
            seek_pdir,
            ids,
        }
        .write(&mut w);
        let header = w.into_inner();
        out.extend_from_slice(&header);
        out.extend_from_slice(&stored);
        header
    }

    /// Append one basket under its own key; returns `(seek, n_bytes)`.
    fn write_basket(
        &self,
        out: &mut Vec<u8>,
        ids: (&str, &str, &str),
        seek_pdir: u64,
        (entry_size, n_entries): (usize, usize),
        data: &[u8],
    ) -> (u64, u32) {
        let key_len = key_header_len(false, ids) + BASKET_HEADER_LEN;
        let stored = if self.compress { zlib_blocks(data) } else { data.to_vec() };
        let seek = out.len() as u64;
        let n_bytes = (key_len + stored.len()) as u32;

        let mut w = WBuffer::new();
        BasketHeader {
            key: KeyHeader {
                large: false,
                n_bytes,
                obj_len: data.len() as u32,
                key_len: key_len as u16,
                cycle: 1,
                seek_key: seek,
                seek_pdir,
                ids,
            },
            entry_size,
            n_entries,
            flag: 0,
        }
        .write(&mut w);
        out.extend_from_slice(&w.into_inner());
        out.extend_from_slice(&stored);
        (seek, n_bytes)
    }

    /// Append one branch's baskets and describe where they went.
    fn write_baskets(
        &self,
        out: &mut Vec<u8>,
        tree: &TreeSpec,
        branch: &BranchSpec,
        seek_pdir: u64,
    ) -> BasketLayout {
        let entries = tree.entries();
        let entry_size = branch.column.elem_size() * branch.len;
        let ids = ("TBasket", branch.name.as_str(), tree.name.as_str());
        let mut layout = BasketLayout {
            bytes: Vec::new(),
            entry: Vec::new(),
            seek: Vec::new(),
            tot_bytes: 0,
            zip_bytes: 0,
            embedded: None,
        };

        let mut first = 0;
        while first < entries {
            let end = (first + tree.basket_entries).min(entries);
            let data = branch.column.encode(first * branch.len, end * branch.len);
            layout.entry.push(first as i64);
            layout.tot_bytes += data.len() as i64;
            if tree.unflushed && end == entries {
                layout.embedded = Some(embedded_basket(ids, (entry_size, end - first), &data));
            } else {
                let (seek, n_bytes) =
                    self.write_basket(out, ids, seek_pdir, (entry_size, end - first), &data);
                layout.bytes.push(n_bytes as i32);
                layout.seek.push(seek as i64);
                layout.zip_bytes += n_bytes as i64;
            }
            first = end;
        }
        // The basket still being filled starts where the written ones end.
        if layout.embedded.is_none() {
            layout.entry.push(entries as i64);
        }
        layout
    }

    /// Append a tree's baskets and metadata; returns the tree key header.
    fn write_tree(&self, out: &mut Vec<u8>, tree: &TreeSpec, seek_pdir: u64) -> Vec<u8> {
        let layouts: Vec<BasketLayout> =
            tree.branches.iter().map(|b| self.write_baskets(out, tree, b, seek_pdir)).collect();

        let ids = (tree.class_name(), tree.name.as_str(), tree.title.as_str());
        let payload = ttree_payload(tree, &layouts, key_header_len(self.large, ids));
        self.write_record(out, ids, tree.cycle, seek_pdir, &payload, self.compress)
    }
}

/// A TBasket streamed inside its branch: key and basket header, then a
/// buffer that repeats the header before the values.
fn embedded_basket(
    ids: (&str, &str, &str),
    (entry_size, n_entries): (usize, usize),
    data: &[u8],
) -> Vec<u8> {
    let key_len = key_header_len(false, ids) + BASKET_HEADER_LEN;
    let header = BasketHeader {
        key: KeyHeader {
            large: false,
            n_bytes: (key_len + data.len()) as u32,
            obj_len: data.len() as u32,
            key_len: key_len as u16,
            cycle: 1,
            seek_key: 0,
            seek_pdir: 0,
            ids,
        },
        entry_size,
        n_entries,
        flag: EMBEDDED_BASKET_FLAG,
    };
    let mut w = WBuffer::new();
    header.write(&mut w);
    header.write(&mut w);
    w.write_bytes(data);
    w.into_inner()
}

/// zlib-compress `data` into ROOT `ZL` blocks; returns `data` unchanged when
/// compression does not shrink it.
fn zlib_blocks(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut out = Vec::new();
    for chunk in data.chunks(MAX_BLOCK_LEN) {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        if enc.write_all(chunk).is_err() {
            return data.to_vec();
        }
        let Ok(compressed) = enc.finish() else {
            return data.to_vec();
        };
        out.extend_from_slice(b"ZL");
        out.push(8);
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes()[..3]);
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes()[..3]);
        out.extend_from_slice(&compressed);
    }
    if out.len() >= data.len() || data.len() < BLOCK_HEADER_LEN { data.to_vec() } else { out }
}

// ── Streamers ─────────────────────────────────────────────────

/// Write a `TObjArray` header for `count` elements; close it with
/// [`WBuffer::end_object`].
fn begin_objarray(w: &mut WBuffer, count: usize) -> usize {
    let start = w.begin_object(3);
    w.write_tobject();
    w.write_string("");
    w.write_i32(count as i32);
    w.write_i32(0);
    start
}

fn write_empty_objarray(w: &mut WBuffer) {
    let start = begin_objarray(w, 0);
    w.end_object(start);
}

/// A branch to be streamed.
enum BranchNode<'a> {
    /// One leaf over its own baskets; `element` writes the split-object form.
    Leaf { spec: &'a BranchSpec, layout: &'a BasketLayout, element: bool },
    /// A leafless object branch whose members are split into children.
    Object { name: &'a str, children: Vec<(&'a BranchSpec, &'a BasketLayout)> },
}

/// Stream a TTree (v20), wrapped in a TNtuple (v2) when asked for.
fn ttree_payload(tree: &TreeSpec, layouts: &[BasketLayout], key_len: usize) -> Vec<u8> {
    let mut w = WBuffer::new();
    let mut tags = ClassTags::new(key_len);
    let entries = tree.entries();
    let tot_bytes: i64 = layouts.iter().map(|l| l.tot_bytes).sum();
    let zip_bytes: i64 = layouts.iter().map(|l| l.zip_bytes).sum();

    let ntuple_start = tree.ntuple.then(|| w.begin_object(2));
    let tree_start = w.begin_object(20);
    w.write_tnamed(&tree.name, &tree.title);

    let att = w.begin_object(2); // TAttLine
    w.write_i16(602);
    w.write_i16(1);
    w.write_i16(1);
    w.end_object(att);
    let att = w.begin_object(2); // TAttFill
    w.write_i16(0);
    w.write_i16(1001);
    w.end_object(att);
    let att = w.begin_object(2); // TAttMarker
    w.write_i16(1);
    w.write_i16(1);
    w.write_f32(1.0);
    w.end_object(att);

    w.write_i64(entries as i64); // fEntries
    w.write_i64(tot_bytes);
    w.write_i64(zip_bytes);
    w.write_i64(tot_bytes); // fSavedBytes
    w.write_i64(0); // fFlushedBytes
    w.write_f64(1.0); // fWeight
    w.write_i32(0); // fTimerInterval
    w.write_i32(25); // fScanField
    w.write_i32(0); // fUpdate
    w.write_i32(1000); // fDefaultEntryOffsetLen
    w.write_i32(0); // fNClusterRange
    w.write_i64(1_000_000_000_000); // fMaxEntries
    w.write_i64(1_000_000_000_000); // fMaxEntryLoop
    w.write_i64(0); // fMaxVirtualSize
    w.write_i64(-300_000_000); // fAutoSave
    w.write_i64(-30_000_000); // fAutoFlush
    w.write_i64(1_000_000); // fEstimate
    w.write_u8(0); // fClusterRangeEnd
    w.write_u8(0); // fClusterSize
    let io = w.begin_object(1); // fIOFeatures
    w.write_u8(0);
    w.end_object(io);

    // fBranches
    match &tree.split_object {
        None => {
            let arr = begin_objarray(&mut w, tree.branches.len());
            for (spec, layout) in tree.branches.iter().zip(layouts) {
                let node = BranchNode::Leaf { spec, layout, element: false };
                tags.write_element(&mut w, "TBranch", |w, tags| {
                    write_tbranch(w, tags, &node, entries)
                });
            }
            w.end_object(arr);
        }
        Some(parent) => {
            let arr = begin_objarray(&mut w, 1);
            let node = BranchNode::Object {
                name: parent,
                children: tree.branches.iter().zip(layouts).collect(),
            };
            tags.write_element(&mut w, "TBranchElement", |w, tags| {
                write_tbranch_element(w, tags, &node, entries)
            });
            w.end_object(arr);
        }
    }

    write_empty_objarray(&mut w); // fLeaves
    w.end_object(tree_start);

    if let Some(start) = ntuple_start {
        w.write_i32(tree.branches.len() as i32); // fNvar
        w.end_object(start);
    }
    w.into_inner()
}

/// Stream a TBranchElement (v10): the TBranch base, then its own members.
fn write_tbranch_element(w: &mut WBuffer, tags: &mut ClassTags, node: &BranchNode, entries: usize) {
    let start = w.begin_object(10);
    write_tbranch(w, tags, node, entries);

    let (class_name, id, streamer_type) = match node {
        BranchNode::Object { name, .. } => (*name, -1, -1),
        BranchNode::Leaf { spec, .. } => ("", 0, spec.column.element_type()),
    };
    w.write_string(class_name); // fClassName
    w.write_string(""); // fParentName
    w.write_string(""); // fClonesName
    w.write_u32(0); // fCheckSum
    w.write_i16(1); // fClassVersion
    w.write_i32(id); // fID
    w.write_i32(0); // fType
    w.write_i32(streamer_type); // fStreamerType
    w.write_i32(0); // fMaximum
    w.write_u32(0); // fBranchCount
    w.write_u32(0); // fBranchCount2
    w.end_object(start);
}

/// Stream a TBranch (v13).
fn write_tbranch(w: &mut WBuffer, tags: &mut ClassTags, node: &BranchNode, entries: usize) {
    let (name, title, layout) = match node {
        BranchNode::Leaf { spec, layout, element: false } => {
            (spec.name.as_str(), spec.title(), Some(*layout))
        }
        BranchNode::Leaf { spec, layout, element: true } => {
            (spec.name.as_str(), spec.name.clone(), Some(*layout))
        }
        BranchNode::Object { name, .. } => (*name, name.to_string(), None),
    };
    let n_baskets = layout.map_or(0, |l| l.seek.len());
    let max_baskets = n_baskets + 1;
    let (tot_bytes, zip_bytes) = layout.map_or((0, 0), |l| (l.tot_bytes, l.zip_bytes));

    let start = w.begin_object(13);
    w.write_tnamed(name, &title);
    let att = w.begin_object(2); // TAttFill
    w.write_i16(0);
    w.write_i16(1001);
    w.end_object(att);

    w.write_i32(0); // fCompress
    w.write_i32(32000); // fBasketSize
    w.write_i32(0); // fEntryOffsetLen
    w.write_i32(n_baskets as i32); // fWriteBasket
    w.write_i64(entries as i64); // fEntryNumber
    let io = w.begin_object(1); // fIOFeatures
    w.write_u8(0);
    w.end_object(io);
    w.write_i32(0); // fOffset
    w.write_i32(max_baskets as i32);
    w.write_i32(0); // fSplitLevel
    w.write_i64(entries as i64);
    w.write_i64(0); // fFirstEntry
    w.write_i64(tot_bytes);
    w.write_i64(zip_bytes);

    match node {
        BranchNode::Object { children, .. } => {
            let arr = begin_objarray(w, children.len()); // fBranches
            for &(spec, layout) in children {
                let child = BranchNode::Leaf { spec, layout, element: true };
                tags.write_element(w, "TBranchElement", |w, tags| {
                    write_tbranch_element(w, tags, &child, entries)
                });
            }
            w.end_object(arr);
            write_empty_objarray(w); // fLeaves
        }
        BranchNode::Leaf { spec, element, .. } => {
            write_empty_objarray(w); // fBranches
            let arr = begin_objarray(w, 1); // fLeaves
            let class_name = if *element { "TLeafElement" } else { spec.column.leaf_class() };
            tags.write_element(w, class_name, |w, _| write_leaf(w, spec, *element));
            w.end_object(arr);
        }
    }

    // fBaskets: null slots for the baskets on disk, then the one in memory.
    match layout.and_then(|l| l.embedded.as_deref()) {
        Some(body) => {
            let arr = begin_objarray(w, max_baskets);
            for _ in 0..n_baskets {
                w.write_u32(0);
            }
            tags.write_element(w, "TBasket", |w, _| w.write_bytes(body));
            w.end_object(arr);
        }
        None => write_empty_objarray(w),
    }

    let bytes = layout.map_or(&[][..], |l| &l.bytes[..]);
    let entry = layout.map_or(&[][..], |l| &l.entry[..]);
    let seek = layout.map_or(&[][..], |l| &l.seek[..]);
    w.write_u8(1);
    for i in 0..max_baskets {
        w.write_i32(bytes.get(i).copied().unwrap_or(0));
    }
    w.write_u8(1);
    for i in 0..max_baskets {
        w.write_i64(entry.get(i).copied().unwrap_or(0));
    }
    w.write_u8(1);
    for i in 0..max_baskets {
        w.write_i64(seek.get(i).copied().unwrap_or(0));
    }
    w.write_string(""); // fFileName
    w.end_object(start);
}

/// Stream one `TLeaf*`, or a `TLeafElement` carrying the basic type code.
fn write_leaf(w: &mut WBuffer, spec: &BranchSpec, element: bool) {
    let leaf = w.begin_object(1);
    let base = w.begin_object(2);
    w.write_tnamed(&spec.name, &spec.name);
    w.write_i32(spec.len as i32); // fLen
    w.write_i32(spec.column.elem_size() as i32); // fLenType
    w.write_i32(0); // fOffset
    w.write_u8(0); // fIsRange
    w.write_u8(0); // fIsUnsigned
    w.write_u32(0); // fLeafCount
    w.end_object(base);
    if element {
        w.write_i32(0); // fID
        w.write_i32(spec.column.element_type()); // fType
    } else {
        spec.column.write_range(w);
    }
    w.end_object(leaf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basket::read_embedded_basket;
    use crate::key::Key;
    use crate::rbuffer::RBuffer;

    #[test]
    fn byte_count_covers_version_and_body() {
        let mut w = WBuffer::new();
        let start = w.begin_object(7);
        w.write_u32(0xdead_beef);
        w.end_object(start);
        let bytes = w.into_inner();

        let mut r = RBuffer::new(&bytes);
        let (version, end) = r.read_version().unwrap();
        assert_eq!(version, 7);
        assert_eq!(end, Some(bytes.len()));
    }

    #[test]
    fn long_strings_use_extended_length() {
        let long = "x".repeat(300);
        let mut w = WBuffer::new();
        w.write_string(&long);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), string_len(&long));
        assert_eq!(RBuffer::new(&bytes).read_string().unwrap(), long);
    }

    #[test]
    fn incompressible_data_is_stored_raw() {
        assert_eq!(zlib_blocks(&[1, 2, 3]), vec![1, 2, 3]);
        let zeros = vec![0u8; 4096];
        let packed = zlib_blocks(&zeros);
        assert_eq!(&packed[..2], b"ZL");
        assert_eq!(crate::decompress::decompress(&packed, zeros.len()).unwrap(), zeros);
    }

    #[test]
    fn key_headers_match_their_declared_length() {
        for large in [false, true] {
            let ids = ("TTree", "twoMuon", "muon pairs");
            let key_len = key_header_len(large, ids);
            let mut w = WBuffer::new();
            KeyHeader {
                large,
                n_bytes: key_len as u32 + 10,
                obj_len: 10,
                key_len: key_len as u16,
                cycle: 2,
                seek_key: 4096,
                seek_pdir: 100,
                ids,
            }
            .write(&mut w);
            let bytes = w.into_inner();
            assert_eq!(bytes.len(), key_len);

            let key = Key::read(&mut RBuffer::new(&bytes)).unwrap();
            assert_eq!(key.version > 1000, large);
            assert_eq!(key.seek_key, 4096);
            assert_eq!(key.seek_pdir, 100);
            assert_eq!(key.cycle, 2);
            assert_eq!(key.title, "muon pairs");
        }
    }

    #[test]
    fn embedded_basket_reads_back() {
        let data = Column::F64(vec![0.5, -1.5]).encode(0, 2);
        let body = embedded_basket(("TBasket", "e", "events"), (8, 2), &data);

        let mut r = RBuffer::new(&body);
        let basket = read_embedded_basket(&mut r).unwrap();
        assert_eq!(basket.n_entries, 2);
        assert_eq!(basket.values(), &data[..]);
        assert_eq!(r.remaining(), 0);
    }
}
