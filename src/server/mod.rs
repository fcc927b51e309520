//! Server node: request routing, conflict merges, range splits
//!
//! Every data RPC starts with an ownership test against the local range
//! table: handle locally when the key's bucket is ours, otherwise forward
//! the same call to the owner. Forwarding is one hop; a stale table means
//! the next server forwards again, so requests converge after at most one
//! redirection per table update.

pub mod client;
pub mod grpc;
pub mod mesh;
pub mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::actions::ActionInvoker;
use crate::common::{hash, Config, Error, Result};
use crate::indexing::IndexingService;
use crate::storage::{Node, Store, ROOT_DEP};

pub use transport::{Dialer, Peer, SplitUpdate};

/// Replacement children returned by a merge function, rooted at the
/// forked parent. Anything else in the response is a decoding error.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MergeResponse {
    nodes: Vec<Node>,
}

/// One member of the cluster.
///
/// All collaborators are injected: the store and range table are this
/// server's own state, the dialer reaches peers, the invoker reaches the
/// action runtime hosting merge functions.
pub struct Server {
    addr: String,
    servers: Vec<String>,
    available: Mutex<Vec<String>>,
    threshold: usize,
    store: Arc<Store>,
    indexing: Arc<IndexingService>,
    dialer: Arc<dyn Dialer>,
    invoker: Arc<dyn ActionInvoker>,
    merge_functions: Mutex<HashMap<u64, String>>,
    global_merge_function: Mutex<String>,
    /// Request-vs-split coordination: requests run shared, splits exclusive
    phase: RwLock<()>,
}

impl Server {
    pub fn new(
        config: Config,
        store: Arc<Store>,
        indexing: Arc<IndexingService>,
        dialer: Arc<dyn Dialer>,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Arc<Self> {
        // Until the first split, the initial server owns everything
        indexing.add_mapping(0, u32::MAX, config.initial.clone());

        Arc::new(Self {
            addr: config.self_addr,
            servers: config.servers,
            available: Mutex::new(config.available_servers),
            threshold: config.threshold,
            store,
            indexing,
            dialer,
            invoker,
            merge_functions: Mutex::new(HashMap::new()),
            global_merge_function: Mutex::new(String::new()),
            phase: RwLock::new(()),
        })
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    pub fn available_servers(&self) -> Vec<String> {
        self.available.lock().unwrap().clone()
    }

    pub fn global_merge_function(&self) -> String {
        self.global_merge_function.lock().unwrap().clone()
    }

    /// Per-location merge-function entry, if this server holds one
    pub fn merge_function(&self, location: u64) -> Option<String> {
        self.merge_functions.lock().unwrap().get(&location).cloned()
    }

    /// Resolve `key` starting from the version node at `location`.
    pub async fn handle_get(&self, key: &str, location: u64) -> Result<String> {
        let owner = self.owner_of_key(key)?;
        if !self.is_self(&owner) {
            return self.dial(&owner).await?.get(key, location).await;
        }

        match self.store.get(key, location).await {
            Err(Error::LocationNotFound(dangling)) => self.resume_walk(key, dangling).await,
            result => result,
        }
    }

    /// Write `value` under `key` as a child version of `dep`.
    pub async fn handle_set(&self, key: &str, value: &str, dep: u64) -> Result<u64> {
        let guard = self.phase.read().await;

        let owner = self.owner_of_key(key)?;
        let location = if self.is_self(&owner) {
            let location = self.store.set(key, value, dep).await;
            if dep != 0 {
                let parent = self.handle_add_child(dep, location).await?;
                if parent.children.len() > 1 {
                    let merge = self.merge_function_for(dep);
                    if !merge.is_empty() {
                        self.run_merge(&merge, &parent).await?;
                    }
                }
            }
            location
        } else {
            self.dial(&owner).await?.set(key, value, dep).await?
        };

        tracing::debug!(
            key,
            location = format_args!("{:x}", location),
            size = self.store.size(),
            "set"
        );

        // The size check runs on the forwarding path too, against the
        // forwarder's own store.
        if self.store.size() > self.threshold && !self.available.lock().unwrap().is_empty() {
            // Non-atomic upgrade: another Set may observe a pre-split
            // size. The indexing lock is the cross-server serializer.
            drop(guard);
            let _exclusive = self.phase.write().await;
            self.split_range().await?;
        }

        Ok(location)
    }

    /// Fetch a node snapshot, following ownership.
    pub async fn handle_get_node(&self, location: u64) -> Result<Node> {
        let owner = self.owner_of_location(location)?;
        if self.is_self(&owner) {
            self.store
                .get_node(location)
                .ok_or(Error::LocationNotFound(location))
        } else {
            self.dial(&owner).await?.get_node(location).await
        }
    }

    /// Install a node shipped from another server. Never routed: the
    /// sender has already grouped nodes by owner.
    pub fn handle_add_node(&self, node: Node) {
        self.store.add_node(node);
        tracing::debug!(size = self.store.size(), "node installed");
    }

    /// Append a child link, following ownership of the parent.
    pub async fn handle_add_child(&self, location: u64, child: u64) -> Result<Node> {
        let owner = self.owner_of_location(location)?;
        if self.is_self(&owner) {
            self.store.add_child(location, child)
        } else {
            self.dial(&owner).await?.add_child(location, child).await
        }
    }

    /// Tombstone a node's locally-stored children and clear its child
    /// list, following ownership of the parent.
    pub async fn handle_remove_children(&self, location: u64) -> Result<()> {
        let owner = self.owner_of_location(location)?;
        if self.is_self(&owner) {
            self.store.remove_children(location)
        } else {
            self.dial(&owner).await?.remove_children(location).await
        }
    }

    /// Apply a broadcast range rewrite and retire the recruited peer from
    /// the available list.
    pub fn handle_split(&self, update: SplitUpdate) {
        self.indexing.remove_mapping(update.left, update.right);
        self.indexing
            .add_mapping(update.left, update.mid, update.left_server.clone());
        self.indexing
            .add_mapping(update.mid + 1, update.right, update.right_server.clone());

        let mut available = self.available.lock().unwrap();
        if let Some(at) = available
            .iter()
            .position(|addr| *addr == update.left_server || *addr == update.right_server)
        {
            available.swap_remove(at);
        }
    }

    /// Advisory split lock. A second acquire reports failure and leaves
    /// the lock held; release always succeeds.
    pub fn handle_set_indexing_lock(&self, lock: bool) -> bool {
        if lock {
            self.indexing.try_lock()
        } else {
            self.indexing.unlock();
            true
        }
    }

    /// Store or delete a per-location merge-function name.
    ///
    /// The entry stays on whichever server received this call, and `Set`
    /// consults only its local table.
    pub fn handle_set_merge_function(&self, location: u64, name: &str) {
        let mut table = self.merge_functions.lock().unwrap();
        if name.is_empty() {
            table.remove(&location);
        } else {
            table.insert(location, name.to_string());
        }
    }

    /// Set the fallback merge function on every server.
    ///
    /// Recipients that already carry `name` absorb the call instead of
    /// forwarding it again, which is what terminates the broadcast.
    pub async fn handle_set_global_merge_function(&self, name: &str) -> Result<()> {
        {
            let mut global = self.global_merge_function.lock().unwrap();
            if *global == name {
                return Ok(());
            }
            *global = name.to_string();
        }

        for addr in &self.servers {
            if !self.is_self(addr) {
                self.dial(addr).await?.set_global_merge_function(name).await?;
            }
        }
        Ok(())
    }

    /// Continue a parent walk whose next link does not resolve locally:
    /// fetch each node from its owner until the key matches or a root is
    /// reached.
    async fn resume_walk(&self, key: &str, mut location: u64) -> Result<String> {
        loop {
            let node = self.handle_get_node(location).await?;
            if node.key == key {
                return Ok(node.value);
            }
            if node.dep == ROOT_DEP {
                return Err(Error::KeyNotFound(key.to_string()));
            }
            location = node.dep;
        }
    }

    fn merge_function_for(&self, location: u64) -> String {
        match self.merge_functions.lock().unwrap().get(&location) {
            Some(name) => name.clone(),
            None => self.global_merge_function.lock().unwrap().clone(),
        }
    }

    /// Invoke the merge function on a forked parent and swap its children
    /// for the returned replacement tree.
    async fn run_merge(&self, name: &str, parent: &Node) -> Result<()> {
        let payload = serde_json::to_vec(parent)?;
        let response = self.invoker.invoke(name, &payload).await?;
        let merged: MergeResponse = serde_json::from_slice(&response)?;

        self.distribute_nodes(&merged.nodes).await?;

        self.handle_remove_children(parent.location).await?;
        for node in &merged.nodes {
            self.handle_add_child(node.dep, node.location).await?;
        }

        tracing::debug!(
            parent = format_args!("{:x}", parent.location),
            replacements = merged.nodes.len(),
            function = name,
            "merge applied"
        );
        Ok(())
    }

    /// Ship nodes to their owning servers, grouped per owner.
    async fn distribute_nodes(&self, nodes: &[Node]) -> Result<()> {
        let mut by_server: HashMap<String, Vec<Node>> = HashMap::new();
        for node in nodes {
            let owner = self.owner_of_location(node.location)?;
            by_server.entry(owner).or_default().push(node.clone());
        }

        for (server, group) in by_server {
            if self.is_self(&server) {
                for node in group {
                    self.store.add_node(node);
                }
            } else {
                let peer = self.dial(&server).await?;
                for node in group {
                    peer.add_node(node).await?;
                }
            }
        }
        Ok(())
    }

    /// Split this server's range at its midpoint and migrate the smaller
    /// half of the local nodes to a recruited peer.
    ///
    /// Two servers over threshold may race here; the loser of the peer's
    /// indexing lock abandons and retries on its next over-threshold
    /// write.
    async fn split_range(&self) -> Result<()> {
        let (left, right) = self.indexing.range(&self.addr);
        if left == right {
            return Ok(());
        }

        let peer_addr = {
            let available = self.available.lock().unwrap();
            if available.is_empty() {
                return Ok(());
            }
            available[rand::thread_rng().gen_range(0..available.len())].clone()
        };

        let peer = self.dial(&peer_addr).await?;
        if !peer.set_indexing_lock(true).await? {
            tracing::debug!(peer = %peer_addr, "indexing lock contended, split abandoned");
            return Ok(());
        }

        let mid = mid_point(left, right);
        let (low, high): (Vec<Node>, Vec<Node>) = self
            .store
            .valid_nodes()
            .into_iter()
            .partition(|node| hash::location_bucket(node.location) <= mid);

        // The larger half stays where it already lives
        let (migrating, left_server, right_server) = if high.len() >= low.len() {
            (low, peer_addr.clone(), self.addr.clone())
        } else {
            (high, self.addr.clone(), peer_addr.clone())
        };

        tracing::info!(
            left = format_args!("{:#x}", left),
            right = format_args!("{:#x}", right),
            mid = format_args!("{:#x}", mid),
            peer = %peer_addr,
            migrating = migrating.len(),
            "splitting range"
        );

        for node in &migrating {
            peer.add_node(node.clone()).await?;
        }

        // Hand over merge-function entries for migrated locations
        for node in &migrating {
            let entry = self.merge_function(node.location);
            if let Some(name) = entry {
                peer.set_merge_function(node.location, &name).await?;
                self.merge_functions.lock().unwrap().remove(&node.location);
            }
        }

        let update = SplitUpdate {
            left,
            right,
            mid,
            left_server,
            right_server,
        };
        for addr in &self.servers {
            if self.is_self(addr) {
                self.handle_split(update.clone());
            } else if *addr == peer_addr {
                peer.split(update.clone()).await?;
            } else {
                self.dial(addr).await?.split(update.clone()).await?;
            }
        }

        // Both servers answer for the migrated keys until every range
        // table is rewritten; only then drop them locally.
        for node in &migrating {
            self.store.remove_node(node.location);
        }

        peer.set_indexing_lock(false).await?;
        Ok(())
    }

    fn is_self(&self, addr: &str) -> bool {
        addr == self.addr
    }

    async fn dial(&self, addr: &str) -> Result<Box<dyn Peer>> {
        self.dialer.dial(addr).await
    }

    fn owner_of_bucket(&self, bucket: u32) -> Result<String> {
        self.indexing.locate(bucket).ok_or(Error::NoMapping(bucket))
    }

    fn owner_of_key(&self, key: &str) -> Result<String> {
        self.owner_of_bucket(hash::hash32(key))
    }

    fn owner_of_location(&self, location: u64) -> Result<String> {
        self.owner_of_bucket(hash::location_bucket(location))
    }
}

fn mid_point(left: u32, right: u32) -> u32 {
    ((left as u64 + right as u64) / 2) as u32
}
