//! Peer transport abstraction
//!
//! The server core talks to other servers only through these traits, so
//! the same routing and split logic runs over real gRPC channels or over
//! an in-process mesh. A `Peer` is a connected unary request/response
//! channel to one named endpoint; a `Dialer` opens them.

use tonic::async_trait;

use crate::common::Result;
use crate::storage::Node;

/// Range rewrite broadcast during a split: `[left, right]` becomes
/// `[left, mid] -> left_server` and `[mid+1, right] -> right_server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitUpdate {
    pub left: u32,
    pub right: u32,
    pub mid: u32,
    pub left_server: String,
    pub right_server: String,
}

/// A connected channel to one server, one method per RPC
#[async_trait]
pub trait Peer: Send + Sync {
    async fn get(&self, key: &str, location: u64) -> Result<String>;
    async fn set(&self, key: &str, value: &str, dep: u64) -> Result<u64>;
    async fn get_node(&self, location: u64) -> Result<Node>;
    async fn add_node(&self, node: Node) -> Result<()>;
    async fn add_child(&self, location: u64, child: u64) -> Result<Node>;
    async fn remove_children(&self, location: u64) -> Result<()>;
    async fn split(&self, update: SplitUpdate) -> Result<()>;
    async fn set_indexing_lock(&self, lock: bool) -> Result<bool>;
    async fn set_merge_function(&self, location: u64, name: &str) -> Result<()>;
    async fn set_global_merge_function(&self, name: &str) -> Result<()>;
}

/// Opens peer channels by address
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Peer>>;
}
