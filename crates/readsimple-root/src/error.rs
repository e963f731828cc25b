//! Error types for ROOT file reading.

use thiserror::Error;

/// Errors that can occur reading ROOT files.
#[derive(Error, Debug)]
pub enum RootError {
    /// I/O error reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid ROOT file magic bytes.
    #[error("not a ROOT file (bad magic)")]
    BadMagic,

    /// Unsupported streamer or file version.
    #[error("unsupported {what} version: {version}")]
    UnsupportedVersion {
        /// Which record carried the version.
        what: &'static str,
        /// The version found in the stream.
        version: u32,
    },

    /// Buffer underflow (tried to read past end).
    #[error("unexpected end of buffer at offset {offset}, need {need} bytes, have {have}")]
    BufferUnderflow {
        /// Current offset in buffer.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Key not found in directory.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Unsupported object class.
    #[error("unsupported class: {0}")]
    UnsupportedClass(String),

    /// Decompression failure.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Object deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Branch not found in tree.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Tree not found in file.
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// A named object exists but is not a TTree.
    #[error("'{name}' is a {class_name}, not a TTree")]
    NotATree {
        /// Object name that was looked up.
        name: String,
        /// Class name stored in its key.
        class_name: String,
    },

    /// Type mismatch (e.g. requesting f32 from an i64 branch).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Scanner misuse or entry out of range.
    #[error("scanner error: {0}")]
    Scanner(String),
}

/// Result alias for ROOT operations.
pub type Result<T> = std::result::Result<T, RootError>;
