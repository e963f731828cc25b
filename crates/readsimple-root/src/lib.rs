//! # readsimple-root
//!
//! Native ROOT file reader for flat ntuples.
//!
//! Opens `.root` files, navigates TKey/TDirectory records, reads TTree
//! metadata and walks entries of selected scalar branches without requiring
//! ROOT or Python. Supports zlib, LZ4, ZSTD, and XZ compression.
//!
//! ## Example
//!
//! ```no_run
//! use readsimple_root::RootFile;
//!
//! let f = RootFile::open("data.root")?;
//! for key in f.list_keys()? {
//!     println!("{} ({})", key.name, key.class_name);
//! }
//!
//! let tree = f.get("twoMuon")?.into_tree()?;
//! println!("entries= {}", tree.entries);
//!
//! let mut sc = f.scanner(&tree, &["mass_mumu", "px"])?;
//! sc.require::<f32>()?;
//! if sc.next() {
//!     sc.scan()?;
//!     let mass: f32 = sc.get(0)?;
//!     println!("{} {}", sc.entry(), mass);
//! }
//! # Ok::<(), readsimple_root::RootError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod basket;
pub mod branch_reader;
pub mod decompress;
pub mod directory;
pub mod error;
pub mod file;
#[cfg(feature = "test-util")]
pub mod fixture;
pub mod key;
pub mod objects;
pub mod rbuffer;
pub mod scanner;
pub mod tree;
pub mod value;

pub use branch_reader::BranchReader;
pub use directory::Directory;
pub use error::{Result, RootError};
pub use file::{Object, RootFile};
pub use key::KeyInfo;
pub use scanner::Scanner;
pub use tree::{BranchInfo, LeafType, Tree};
pub use value::{FromValue, Value};
