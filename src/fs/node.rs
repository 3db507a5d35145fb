//! Overlay node taxonomy
//!
//! Every path the kernel can see is one of three kinds of node. The kind is
//! decided when the node enters the tree (or is first looked up on the
//! backing store) and never changes afterwards.

use crate::handler::Handler;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A node of the overlay
#[derive(Clone)]
pub enum OverlayNode {
    /// No synthetic state; mirrors the backing store
    Passthrough,
    /// Synthetic file backed by a handler
    Leaf(Arc<SyntheticLeaf>),
    /// Synthetic directory grouping synthetic children
    Directory(Arc<SyntheticDirectory>),
}

impl OverlayNode {
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, OverlayNode::Passthrough)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            OverlayNode::Passthrough => "passthrough",
            OverlayNode::Leaf(_) => "leaf",
            OverlayNode::Directory(_) => "directory",
        }
    }
}

impl std::fmt::Debug for OverlayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayNode::Directory(dir) => f
                .debug_struct("Directory")
                .field("children", &dir.order)
                .finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// Synthetic directory: unique names, listed in insertion order
#[derive(Default)]
pub struct SyntheticDirectory {
    children: HashMap<String, OverlayNode>,
    order: Vec<String>,
}

impl SyntheticDirectory {
    pub(crate) fn from_parts(children: HashMap<String, OverlayNode>, order: Vec<String>) -> Self {
        debug_assert_eq!(children.len(), order.len());
        Self { children, order }
    }

    /// Child by name
    pub fn child(&self, name: &str) -> Option<&OverlayNode> {
        self.children.get(name)
    }

    /// Whether `name` is shadowed by a synthetic child
    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    /// Children in insertion order
    pub fn children(&self) -> impl Iterator<Item = (&str, &OverlayNode)> + '_ {
        self.order
            .iter()
            .filter_map(move |name| self.children.get(name).map(|node| (name.as_str(), node)))
    }

    /// Child at position `index` in insertion order
    pub fn child_at(&self, index: usize) -> Option<(&str, &OverlayNode)> {
        let name = self.order.get(index)?;
        self.children.get(name).map(|node| (name.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Content captured from a handler: its bytes, or the errno it failed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Data(Bytes),
    Failed(i32),
}

impl Content {
    /// Byte length, if the handler produced content
    pub fn len(&self) -> Option<u64> {
        match self {
            Content::Data(data) => Some(data.len() as u64),
            Content::Failed(_) => None,
        }
    }
}

/// Synthetic file answering reads and writes through its handler
pub struct SyntheticLeaf {
    handler: Box<dyn Handler>,
    /// Serve opens from a snapshot refreshed on write instead of calling the
    /// handler on every open
    cache: bool,
    /// Seconds since the epoch of the last successful write, 0 if never
    mtime: AtomicU64,
    cached: RwLock<Content>,
    /// Held across set, refetch and cache update so concurrent writers
    /// publish their snapshots in the order their sets landed
    writer: Mutex<()>,
}

impl SyntheticLeaf {
    pub fn new(handler: Box<dyn Handler>, cache: bool) -> Self {
        let leaf = Self {
            handler,
            cache,
            mtime: AtomicU64::new(0),
            cached: RwLock::new(Content::Data(Bytes::new())),
            writer: Mutex::new(()),
        };
        if cache {
            *leaf.cached.write() = leaf.fetch();
        }
        leaf
    }

    pub fn is_cached(&self) -> bool {
        self.cache
    }

    fn fetch(&self) -> Content {
        match self.handler.get() {
            Ok(data) => Content::Data(Bytes::from(data)),
            Err(e) => Content::Failed(e.to_errno()),
        }
    }

    /// Content as an open would see it right now
    pub fn snapshot(&self) -> Content {
        if self.cache {
            self.cached.read().clone()
        } else {
            self.fetch()
        }
    }

    /// Hand `data` to the handler; on success stamp mtime and refresh the
    /// cached snapshot
    pub fn store(&self, data: &[u8]) -> crate::Result<()> {
        let _writer = self.writer.lock();
        self.handler.set(data)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.mtime.store(now, Ordering::SeqCst);

        if self.cache {
            let fresh = self.fetch();
            *self.cached.write() = fresh;
        }
        Ok(())
    }

    /// Time of the last successful write, `None` before the first one
    pub fn modified(&self) -> Option<SystemTime> {
        match self.mtime.load(Ordering::SeqCst) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::sync::atomic::AtomicUsize;

    /// Counts get() calls so cache behavior is observable
    #[derive(Default)]
    struct Counter {
        value: RwLock<Vec<u8>>,
        gets: Arc<AtomicUsize>,
    }

    impl Handler for Counter {
        fn get(&self) -> Result<Vec<u8>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.read().clone())
        }

        fn set(&self, data: &[u8]) -> Result<()> {
            if data.is_empty() {
                return Err(Error::InvalidArgument("empty".into()));
            }
            *self.value.write() = data.to_vec();
            Ok(())
        }

        fn load(&mut self, _config: &serde_yaml::Mapping) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_uncached_leaf_reads_every_time() {
        let gets = Arc::new(AtomicUsize::new(0));
        let handler = Counter {
            gets: gets.clone(),
            ..Default::default()
        };
        let leaf = SyntheticLeaf::new(Box::new(handler), false);
        assert_eq!(gets.load(Ordering::SeqCst), 0);

        leaf.snapshot();
        leaf.snapshot();
        assert_eq!(gets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cached_leaf_refreshes_on_write() {
        let gets = Arc::new(AtomicUsize::new(0));
        let handler = Counter {
            gets: gets.clone(),
            ..Default::default()
        };
        let leaf = SyntheticLeaf::new(Box::new(handler), true);
        assert_eq!(gets.load(Ordering::SeqCst), 1);

        assert_eq!(leaf.snapshot(), Content::Data(Bytes::new()));
        assert_eq!(gets.load(Ordering::SeqCst), 1);

        leaf.store(b"new").unwrap();
        assert_eq!(gets.load(Ordering::SeqCst), 2);
        assert_eq!(leaf.snapshot(), Content::Data(Bytes::from_static(b"new")));
    }

    #[test]
    fn test_store_stamps_mtime_only_on_success() {
        let leaf = SyntheticLeaf::new(Box::new(Counter::default()), false);
        assert!(leaf.modified().is_none());

        assert!(leaf.store(b"").is_err());
        assert!(leaf.modified().is_none());

        leaf.store(b"x").unwrap();
        assert!(leaf.modified().is_some());
    }

    /// Stalls in get() while the value is "A", holding the stale value
    #[derive(Default)]
    struct SlowOnA {
        value: RwLock<Vec<u8>>,
    }

    impl Handler for SlowOnA {
        fn get(&self) -> Result<Vec<u8>> {
            let value = self.value.read().clone();
            if value == b"A" {
                std::thread::sleep(std::time::Duration::from_millis(300));
            }
            Ok(value)
        }

        fn set(&self, data: &[u8]) -> Result<()> {
            *self.value.write() = data.to_vec();
            Ok(())
        }

        fn load(&mut self, _config: &serde_yaml::Mapping) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_writes_leave_cache_current() {
        let leaf = Arc::new(SyntheticLeaf::new(Box::<SlowOnA>::default(), true));

        let first = {
            let leaf = leaf.clone();
            std::thread::spawn(move || leaf.store(b"A").unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        leaf.store(b"B").unwrap();
        first.join().unwrap();

        assert_eq!(leaf.snapshot(), Content::Data(Bytes::from_static(b"B")));
        assert_eq!(leaf.handler.get().unwrap(), b"B");
    }

    #[test]
    fn test_failed_content_carries_errno() {
        struct Broken;
        impl Handler for Broken {
            fn get(&self) -> Result<Vec<u8>> {
                Err(Error::InvalidArgument("nope".into()))
            }
            fn set(&self, _data: &[u8]) -> Result<()> {
                Ok(())
            }
            fn load(&mut self, _config: &serde_yaml::Mapping) -> Result<()> {
                Ok(())
            }
        }

        let leaf = SyntheticLeaf::new(Box::new(Broken), false);
        let content = leaf.snapshot();
        assert_eq!(content, Content::Failed(libc::EINVAL));
        assert_eq!(content.len(), None);
    }

    #[test]
    fn test_directory_order() {
        let mut children = HashMap::new();
        children.insert("b".to_string(), OverlayNode::Passthrough);
        children.insert("a".to_string(), OverlayNode::Passthrough);
        let dir = SyntheticDirectory::from_parts(children, vec!["b".into(), "a".into()]);

        let names: Vec<&str> = dir.children().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(dir.contains("a"));
        assert_eq!(dir.child_at(1).map(|(name, _)| name), Some("a"));
        assert!(dir.child_at(2).is_none());
    }
}
