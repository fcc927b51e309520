//! In-memory versioned node store
//!
//! Nodes are immutable once created except for their child list, which is
//! only edited through locked store operations. Slots are append-only: a
//! removed node leaves a cleared slot behind and its location simply stops
//! resolving. Locations are 64-bit and random in their low half, so reuse
//! is never a practical concern.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::hash;
use crate::common::{Error, Result};

/// Parent link of a root node
pub const ROOT_DEP: u64 = u64::MAX;

// Stand-in for media access until nodes are disk-backed.
const DISK_LATENCY: Duration = Duration::from_millis(10);

/// One immutable version node.
///
/// The high 32 bits of `location` are the key's routing bucket; the low
/// 32 bits are random. Serde field names are the wire shape used both for
/// merge-function payloads and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub location: u64,
    pub dep: u64,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub children: Vec<u64>,
}

/// Mint a fresh node for `key` without storing it anywhere.
///
/// Merge functions build their replacement trees out of these; the store
/// itself mints through [`Store::set`].
pub fn create_node(key: &str, value: &str, dep: u64) -> Node {
    Node {
        location: new_location(key),
        dep,
        key: key.to_string(),
        value: value.to_string(),
        children: Vec::new(),
    }
}

fn new_location(key: &str) -> u64 {
    ((hash::hash32(key) as u64) << 32) | rand::random::<u32>() as u64
}

#[derive(Default)]
struct Inner {
    nodes: Vec<Node>,
    /// Maps locations to slots in `nodes`
    slots: HashMap<u64, usize>,
    /// Count of valid (non-tombstoned) nodes, excluding the root
    size: usize,
}

impl Inner {
    fn node(&self, location: u64) -> Option<&Node> {
        self.slots.get(&location).map(|&slot| &self.nodes[slot])
    }

    fn tombstone(&mut self, location: u64) {
        if let Some(&slot) = self.slots.get(&location) {
            if self.nodes[slot].key.is_empty() {
                // Root sentinel; nothing to clear
                return;
            }
            self.slots.remove(&location);
            self.nodes[slot] = Node::default();
            self.size -= 1;
        }
    }
}

/// Server-local collection of version nodes
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    /// Create a store holding only the root sentinel (slot 0)
    pub fn new() -> Self {
        let root = Node {
            location: 0,
            dep: ROOT_DEP,
            key: String::new(),
            value: String::new(),
            children: Vec::new(),
        };
        let mut inner = Inner::default();
        inner.slots.insert(0, 0);
        inner.nodes.push(root);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Create a valid node for `key` and return its fresh location.
    ///
    /// `dep` is not checked here: the server has already routed this call
    /// to the owner, and the parent may live on another server entirely.
    pub async fn set(&self, key: &str, value: &str, dep: u64) -> u64 {
        tokio::time::sleep(DISK_LATENCY).await;

        let location = new_location(key);
        self.install(Node {
            location,
            dep,
            key: key.to_string(),
            value: value.to_string(),
            children: Vec::new(),
        });
        location
    }

    /// Walk parent links from `start` until a node carrying `key` is found.
    ///
    /// Returns [`Error::KeyNotFound`] when the walk reaches a root, and
    /// [`Error::LocationNotFound`] when a link does not resolve locally —
    /// the caller decides whether to continue the walk on another server.
    pub async fn get(&self, key: &str, start: u64) -> Result<String> {
        tokio::time::sleep(DISK_LATENCY).await;

        let inner = self.inner.read().unwrap();
        let mut location = start;
        loop {
            let node = inner
                .node(location)
                .ok_or(Error::LocationNotFound(location))?;
            if node.key == key {
                return Ok(node.value.clone());
            }
            if node.dep == ROOT_DEP {
                return Err(Error::KeyNotFound(key.to_string()));
            }
            location = node.dep;
        }
    }

    /// Snapshot of the node at `location`, if it resolves
    pub fn get_node(&self, location: u64) -> Option<Node> {
        self.inner.read().unwrap().node(location).cloned()
    }

    /// Append `child` to a node's child list, returning the updated node
    pub fn add_child(&self, location: u64, child: u64) -> Result<Node> {
        let mut inner = self.inner.write().unwrap();
        let slot = *inner
            .slots
            .get(&location)
            .ok_or(Error::LocationNotFound(location))?;
        let node = &mut inner.nodes[slot];
        node.children.push(child);
        Ok(node.clone())
    }

    /// Install a fully-formed node received from another server.
    ///
    /// An existing location is remapped to the new payload.
    pub fn add_node(&self, node: Node) {
        self.install(node);
    }

    /// Tombstone the node at `location`. No-op when it does not resolve.
    pub fn remove_node(&self, location: u64) {
        self.inner.write().unwrap().tombstone(location);
    }

    /// Tombstone every locally-stored child of `location` and clear its
    /// child list. Children owned by other servers are left alone.
    pub fn remove_children(&self, location: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let slot = *inner
            .slots
            .get(&location)
            .ok_or(Error::LocationNotFound(location))?;
        let children = std::mem::take(&mut inner.nodes[slot].children);
        for child in children {
            inner.tombstone(child);
        }
        Ok(())
    }

    /// Snapshot of every valid node (root and tombstones excluded)
    pub fn valid_nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .unwrap()
            .nodes
            .iter()
            .filter(|node| !node.key.is_empty())
            .cloned()
            .collect()
    }

    /// Number of valid nodes
    pub fn size(&self) -> usize {
        self.inner.read().unwrap().size
    }

    fn install(&self, node: Node) {
        let mut inner = self.inner.write().unwrap();
        inner.size += 1;
        let slot = inner.nodes.len();
        inner.slots.insert(node.location, slot);
        inner.nodes.push(node);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_sentinel() {
        let store = Store::new();
        let root = store.get_node(0).unwrap();
        assert_eq!(root.dep, ROOT_DEP);
        assert_eq!(root.key, "");
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get_walks_chain() {
        let store = Store::new();
        let l1 = store.set("a", "1", 0).await;
        let l2 = store.set("b", "2", l1).await;

        assert_eq!(store.get("a", l2).await.unwrap(), "1");
        assert_eq!(store.get("b", l2).await.unwrap(), "2");
        assert_eq!(store.size(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_key() {
        let store = Store::new();
        let l1 = store.set("a", "1", 0).await;

        let err = store.get("missing", l1).await.unwrap_err();
        assert_eq!(err.to_string(), "Key missing not found");
    }

    #[tokio::test]
    async fn test_get_reports_dangling_link() {
        let store = Store::new();
        let remote_dep = 0xdead_beef_0000_0001;
        let l1 = store.set("a", "1", remote_dep).await;

        match store.get("missing", l1).await.unwrap_err() {
            Error::LocationNotFound(loc) => assert_eq!(loc, remote_dep),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_location_carries_key_bucket() {
        let store = Store::new();
        let location = store.set("a", "1", 0).await;
        assert_eq!(hash::location_bucket(location), hash::hash32("a"));
    }

    #[tokio::test]
    async fn test_add_child_returns_snapshot() {
        let store = Store::new();
        let l1 = store.set("x", "1", 0).await;
        let l2 = store.set("y", "2", l1).await;
        let l3 = store.set("z", "3", l1).await;

        store.add_child(l1, l2).unwrap();
        let parent = store.add_child(l1, l3).unwrap();
        assert_eq!(parent.children, vec![l2, l3]);
    }

    #[test]
    fn test_add_child_unknown_location() {
        let store = Store::new();
        assert!(matches!(
            store.add_child(42, 7).unwrap_err(),
            Error::LocationNotFound(42)
        ));
    }

    #[tokio::test]
    async fn test_remove_node_is_idempotent() {
        let store = Store::new();
        let l1 = store.set("a", "1", 0).await;
        assert_eq!(store.size(), 1);

        store.remove_node(l1);
        assert_eq!(store.size(), 0);
        assert!(store.get_node(l1).is_none());

        // Second removal resolves nothing and changes nothing
        store.remove_node(l1);
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_remove_children_skips_remote_children() {
        let store = Store::new();
        let l1 = store.set("x", "1", 0).await;
        let l2 = store.set("y", "2", l1).await;
        let remote_child = 0xfeed_0000_0000_0042;

        store.add_child(l1, l2).unwrap();
        store.add_child(l1, remote_child).unwrap();

        store.remove_children(l1).unwrap();
        assert!(store.get_node(l1).unwrap().children.is_empty());
        assert!(store.get_node(l2).is_none());
        assert_eq!(store.size(), 1);
    }

    #[tokio::test]
    async fn test_add_node_preserves_children() {
        let store = Store::new();
        let node = Node {
            location: 0x0000_0001_0000_0002,
            dep: ROOT_DEP,
            key: "migrated".into(),
            value: "v".into(),
            children: vec![7, 8],
        };

        store.add_node(node.clone());
        assert_eq!(store.get_node(node.location).unwrap().children, vec![7, 8]);
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn test_create_node_buckets_by_key() {
        let node = create_node("k", "v", 3);
        assert_eq!(hash::location_bucket(node.location), hash::hash32("k"));
        assert_eq!(node.dep, 3);
        assert!(node.children.is_empty());
    }
}
