//! FUSE filesystem implementation
//!
//! Overlays synthetic, handler-backed files on a real backing directory.
//! `OverlayFs` holds the semantics; `FuseOverlay` adapts it to fuser.

pub mod attr;
pub mod backing;
mod filesystem;
pub mod handle;
pub mod inode;
pub mod lister;
pub mod node;
mod overlay;
pub mod tree;

pub use backing::{BackingStore, SetAttr};
pub use filesystem::{FuseOverlay, MountConfig, FS_NAME};
pub use inode::ROOT_INO;
pub use lister::DirEntry;
pub use node::{OverlayNode, SyntheticDirectory, SyntheticLeaf};
pub use overlay::{Listing, Opened, OverlayFs};
pub use tree::{OverlayTree, TreeBuilder};
