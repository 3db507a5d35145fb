//! Open file handle management

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::node::{Content, SyntheticLeaf};

/// State behind one open file handle
pub enum OpenFile {
    /// Real file opened on the backing store
    Backing(File),
    /// Synthetic leaf with the content captured at open time
    Synthetic {
        leaf: Arc<SyntheticLeaf>,
        content: Content,
    },
}

impl OpenFile {
    pub fn synthetic(leaf: Arc<SyntheticLeaf>) -> Self {
        let content = leaf.snapshot();
        OpenFile::Synthetic { leaf, content }
    }
}

/// Slice of a snapshot as a read at `offset` of `size` bytes sees it.
///
/// Reads starting at or past the end yield an empty buffer.
pub fn read_window(data: &Bytes, offset: u64, size: u32) -> Bytes {
    let len = data.len() as u64;
    if offset >= len {
        return Bytes::new();
    }
    let end = offset.saturating_add(u64::from(size)).min(len);
    data.slice(offset as usize..end as usize)
}

/// Manages open file handles
pub struct HandleTable {
    next_fh: AtomicU64,
    handles: RwLock<HashMap<u64, Arc<OpenFile>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Register an open file and return its handle
    pub fn open(&self, file: OpenFile) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(fh, Arc::new(file));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.handles.read().get(&fh).cloned()
    }

    /// Close handle and return it
    pub fn close(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.handles.write().remove(&fh)
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerKind;

    #[test]
    fn test_read_window() {
        let data = Bytes::from_static(b"1500\n");
        assert_eq!(read_window(&data, 0, 4096), Bytes::from_static(b"1500\n"));
        assert_eq!(read_window(&data, 1, 2), Bytes::from_static(b"50"));
        assert_eq!(read_window(&data, 3, 100), Bytes::from_static(b"0\n"));
        assert!(read_window(&data, 5, 10).is_empty());
        assert!(read_window(&data, 500, 10).is_empty());
        assert!(read_window(&data, u64::MAX, u32::MAX).is_empty());
    }

    #[test]
    fn test_open_close() {
        let table = HandleTable::new();
        let handler = HandlerKind::Integer
            .load(&serde_yaml::Mapping::new())
            .unwrap();
        let leaf = Arc::new(SyntheticLeaf::new(handler, false));

        let a = table.open(OpenFile::synthetic(leaf.clone()));
        let b = table.open(OpenFile::synthetic(leaf));
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        match table.get(a).as_deref() {
            Some(OpenFile::Synthetic { content, .. }) => {
                assert_eq!(*content, Content::Data(Bytes::from_static(b"0\n")));
            }
            _ => panic!("expected a synthetic handle"),
        }

        assert!(table.close(a).is_some());
        assert!(table.close(a).is_none());
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 1);
    }
}
